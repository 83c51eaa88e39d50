use super::*;
use crate::error::Error;
use crate::mux::mux_func::{match_all, match_dtls, match_srtcp, match_srtp};
use util::conn::conn_pipe::pipe;

const TEST_PIPE_BUFFER_SIZE: usize = 8192;

#[tokio::test]
async fn test_mux_no_endpoints() -> Result<()> {
    let (ca, _cb) = pipe();

    let mut m = Mux::new(Config {
        conn: Arc::new(ca),
        buffer_size: TEST_PIPE_BUFFER_SIZE,
    });

    // packets with no matching endpoint are logged and dropped
    Mux::dispatch(&[0], &m.endpoints).await?;
    m.close().await;

    Ok(())
}

#[tokio::test]
async fn test_mux_dispatch_to_matching_endpoint() -> Result<()> {
    let (ca, cb) = pipe();

    let mut m = Mux::new(Config {
        conn: Arc::new(ca),
        buffer_size: TEST_PIPE_BUFFER_SIZE,
    });

    let e = m.new_endpoint(Box::new(match_all)).await;
    m.remove_endpoint(&e).await;
    let e = m.new_endpoint(Box::new(match_all)).await;

    let payload = b"\x16muxed payload";
    cb.send(payload).await.map_err(crate::error::Error::from)?;

    let mut buf = vec![0u8; TEST_PIPE_BUFFER_SIZE];
    let n = e.recv(&mut buf).await.map_err(|e| Error::new(e.to_string()))?;
    assert_eq!(&buf[..n], payload);

    m.close().await;

    Ok(())
}

#[test]
fn test_match_functions() {
    // DTLS content types land in 20..=63
    assert!(match_dtls(&[22, 0, 0]));
    assert!(!match_dtls(&[128, 0, 0]));

    // RTP: first byte 128..=191, payload type outside the RTCP range
    assert!(match_srtp(&[144, 96, 0, 0]));
    assert!(!match_srtp(&[144, 200, 0, 0]));

    // RTCP: packet type 192..=223
    assert!(match_srtcp(&[144, 200, 0, 0]));
    assert!(!match_srtcp(&[144, 96, 0, 0]));

    // too short to classify
    assert!(!match_srtp(&[]));
}
