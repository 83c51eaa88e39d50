/// MatchFunc decides whether a muxed packet belongs to an endpoint, going
/// by its first bytes.
pub(crate) type MatchFunc = Box<dyn (Fn(&[u8]) -> bool) + Send + Sync>;

pub(crate) fn match_all(_b: &[u8]) -> bool {
    true
}

pub(crate) fn match_range(lower: u8, upper: u8) -> MatchFunc {
    Box::new(move |buf: &[u8]| -> bool {
        if buf.is_empty() {
            return false;
        }
        buf[0] >= lower && buf[0] <= upper
    })
}

/// match_dtls accepts the DTLS content-type range of RFC 7983 §7.
pub(crate) fn match_dtls(b: &[u8]) -> bool {
    match_range(20, 63)(b)
}

fn match_srtp_or_srtcp(b: &[u8]) -> bool {
    match_range(128, 191)(b)
}

// RTCP packet types 192..=223 per RFC 5761 §4.
fn is_rtcp(buf: &[u8]) -> bool {
    buf.len() > 1 && (192..=223).contains(&buf[1])
}

pub(crate) fn match_srtp(buf: &[u8]) -> bool {
    match_srtp_or_srtcp(buf) && !is_rtcp(buf)
}

pub(crate) fn match_srtcp(buf: &[u8]) -> bool {
    match_srtp_or_srtcp(buf) && is_rtcp(buf)
}
