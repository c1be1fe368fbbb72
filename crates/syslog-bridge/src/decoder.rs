// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Syslog frame decoding.
//!
//! The listener only depends on the [`Decoder`] trait. [`Rfc3164Decoder`] is the BSD syslog
//! implementation used by the server. It follows the relay rules of RFC 3164 section 4.3:
//!
//! - a frame without a valid PRI part is kept whole as content, with priority 13 (user.notice)
//! - a header whose timestamp cannot be understood gets the receive time, and everything after
//!   the PRI part becomes content
//!
//! BSD timestamps carry no year. The year of the receive time is used, stepping back one year
//! when that would put the message more than a day in the future (messages sent on Dec 31 and
//! received on Jan 1).

use std::net::SocketAddr;

use chrono::{DateTime, Datelike, NaiveDate, SubsecRound, TimeZone, Utc};

use crate::errors::DecodeError;
use crate::record::LogRecord;

/// Default upper bound for a single frame, matching the usual 8KB syslog relay buffer.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 8192;

/// Priority assigned to frames that carry no PRI part.
const DEFAULT_PRIORITY: u8 = 13;

const MAX_PRIORITY: u16 = 191;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Turns one raw network frame into a [`LogRecord`].
///
/// Implementations are shared by every listener task, so they must be thread-safe.
pub trait Decoder: Send + Sync + 'static {
    fn decode(&self, frame: &[u8], peer: SocketAddr) -> Result<LogRecord, DecodeError>;
}

/// BSD syslog (RFC 3164) decoder.
#[derive(Debug, Clone, Copy)]
pub struct Rfc3164Decoder {
    max_message_size: usize,
}

impl Default for Rfc3164Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl Decoder for Rfc3164Decoder {
    fn decode(&self, frame: &[u8], peer: SocketAddr) -> Result<LogRecord, DecodeError> {
        self.decode_at(frame, peer, Utc::now().trunc_subsecs(0))
    }
}

impl Rfc3164Decoder {
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Decodes `frame` as if it was received at `now`.
    pub fn decode_at(
        &self,
        frame: &[u8],
        peer: SocketAddr,
        now: DateTime<Utc>,
    ) -> Result<LogRecord, DecodeError> {
        if frame.len() > self.max_message_size {
            return Err(DecodeError::Oversized {
                size: frame.len(),
                max: self.max_message_size,
            });
        }

        let text = std::str::from_utf8(frame)?;
        let text = text.trim_end_matches(['\n', '\r', '\0']);
        if text.trim().is_empty() {
            return Err(DecodeError::Empty);
        }

        let client = peer.to_string();

        let Some((priority, rest)) = parse_priority(text) else {
            let (facility, severity) = LogRecord::split_priority(DEFAULT_PRIORITY);
            return Ok(LogRecord {
                priority: DEFAULT_PRIORITY,
                facility,
                severity,
                timestamp: now,
                hostname: String::new(),
                tag: String::new(),
                content: text.to_string(),
                client,
            });
        };
        let (facility, severity) = LogRecord::split_priority(priority);

        let Some((timestamp, rest_after_ts)) =
            parse_bsd_timestamp(rest, now).or_else(|| parse_rfc3339_timestamp(rest))
        else {
            return Ok(LogRecord {
                priority,
                facility,
                severity,
                timestamp: now,
                hostname: String::new(),
                tag: String::new(),
                content: rest.to_string(),
                client,
            });
        };

        let (hostname, rest) = rest_after_ts
            .split_once(' ')
            .unwrap_or((rest_after_ts, ""));
        let (tag, content) = parse_tag(rest);

        Ok(LogRecord {
            priority,
            facility,
            severity,
            timestamp,
            hostname: hostname.to_string(),
            tag: tag.to_string(),
            content: content.trim_end().to_string(),
            client,
        })
    }
}

/// Parses `<N>` at the start of the frame. Returns `None` for anything that is not a valid
/// PRI part, in which case the whole frame is treated as content.
fn parse_priority(text: &str) -> Option<(u8, &str)> {
    let body = text.strip_prefix('<')?;
    let end = body.find('>')?;
    let digits = &body[..end];
    if digits.is_empty() || digits.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u16 = digits.parse().ok()?;
    if value > MAX_PRIORITY {
        return None;
    }
    Some((u8::try_from(value).ok()?, &body[end + 1..]))
}

/// Parses a `Mmm dd hh:mm:ss` timestamp. The day may be space padded (`Oct  1`) or not.
fn parse_bsd_timestamp(s: &str, now: DateTime<Utc>) -> Option<(DateTime<Utc>, &str)> {
    let month_name = s.get(0..3)?;
    let month = MONTHS.iter().position(|m| *m == month_name)? + 1;

    let rest = s.get(3..)?.strip_prefix(' ')?;
    let rest = rest.strip_prefix(' ').unwrap_or(rest);

    let day_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if day_len == 0 || day_len > 2 {
        return None;
    }
    let day: u32 = rest[..day_len].parse().ok()?;
    let rest = rest[day_len..].strip_prefix(' ')?;

    let clock = rest.get(0..8)?;
    let mut parts = clock.split(':');
    let hour: u32 = parse_two_digits(parts.next()?)?;
    let minute: u32 = parse_two_digits(parts.next()?)?;
    let second: u32 = parse_two_digits(parts.next()?)?;

    let remainder = &rest[8..];
    let remainder = remainder.strip_prefix(' ').unwrap_or(remainder);

    let month = u32::try_from(month).ok()?;
    let at_year = |year: i32| {
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, minute, second))
            .map(|naive| Utc.from_utc_datetime(&naive))
    };

    let timestamp = match at_year(now.year()) {
        Some(candidate) if candidate.signed_duration_since(now) > chrono::Duration::days(1) => {
            at_year(now.year() - 1)?
        }
        Some(candidate) => candidate,
        None => at_year(now.year() - 1)?,
    };

    Some((timestamp, remainder))
}

fn parse_two_digits(s: &str) -> Option<u32> {
    if s.len() != 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Many senders put an ISO timestamp in a BSD header; accept it as well.
fn parse_rfc3339_timestamp(s: &str) -> Option<(DateTime<Utc>, &str)> {
    let (token, rest) = s.split_once(' ').unwrap_or((s, ""));
    DateTime::parse_from_rfc3339(token)
        .ok()
        .map(|ts| (ts.with_timezone(&Utc), rest))
}

/// Splits `TAG[PID]: content` into tag and content.
///
/// The tag ends at the first `:` or space; a `[` ends it early so the PID is not part of the
/// tag. Without any terminator there is no tag and everything is content.
fn parse_tag(s: &str) -> (&str, &str) {
    let Some(end) = s.find([':', ' ']) else {
        return ("", s);
    };
    let tag_end = s[..end].find('[').unwrap_or(end);
    let content = &s[end + 1..];
    let content = content.strip_prefix(' ').unwrap_or(content);
    (&s[..tag_end], content)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 7)), 40514)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 2, 8, 0, 0).unwrap()
    }

    fn decode(frame: &str) -> LogRecord {
        Rfc3164Decoder::default()
            .decode_at(frame.as_bytes(), peer(), now())
            .unwrap()
    }

    #[test]
    fn test_decode_rfc3164_example() {
        let record = decode("<34>Oct 11 22:14:15 mymachine su: 'su root' failed for lonvick");

        assert_eq!(record.priority, 34);
        assert_eq!(record.facility, 4);
        assert_eq!(record.severity, 2);
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2024, 10, 11, 22, 14, 15).unwrap()
        );
        assert_eq!(record.hostname, "mymachine");
        assert_eq!(record.tag, "su");
        assert_eq!(record.content, "'su root' failed for lonvick");
        assert_eq!(record.client, "192.168.0.7:40514");
    }

    #[test]
    fn test_decode_tag_with_pid() {
        let record = decode("<13>Feb  5 17:32:18 10.0.0.99 sshd[4123]: Accepted publickey\n");

        assert_eq!(record.hostname, "10.0.0.99");
        assert_eq!(record.tag, "sshd");
        assert_eq!(record.content, "Accepted publickey");
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2024, 2, 5, 17, 32, 18).unwrap()
        );
    }

    #[test]
    fn test_decode_unpadded_day() {
        let record = decode("<165>Aug 1 03:04:05 host app: ok");
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2024, 8, 1, 3, 4, 5).unwrap()
        );
        assert_eq!(record.tag, "app");
    }

    #[test]
    fn test_decode_future_date_uses_previous_year() {
        let record = decode("<14>Dec 31 23:59:59 host cron: tick");
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap()
        );
    }

    #[test]
    fn test_decode_rfc3339_timestamp() {
        let record = decode("<14>2024-03-01T10:00:00+02:00 web nginx: GET /");
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
        );
        assert_eq!(record.hostname, "web");
        assert_eq!(record.tag, "nginx");
        assert_eq!(record.content, "GET /");
    }

    #[test]
    fn test_decode_missing_priority_defaults_to_user_notice() {
        let record = decode("just some text");

        assert_eq!(record.priority, 13);
        assert_eq!(record.facility, 1);
        assert_eq!(record.severity, 5);
        assert_eq!(record.timestamp, now());
        assert_eq!(record.content, "just some text");
        assert!(record.hostname.is_empty());
    }

    #[test]
    fn test_decode_invalid_priority_keeps_whole_frame() {
        for frame in ["<999>Oct 11 22:14:15 h t: m", "<abc>hello", "<>x", "<12"] {
            let record = decode(frame);
            assert_eq!(record.priority, 13, "frame {frame}");
            assert_eq!(record.content, frame);
        }
    }

    #[test]
    fn test_decode_unknown_timestamp_keeps_rest_as_content() {
        let record = decode("<30>yesterday at noon host app: hi");

        assert_eq!(record.priority, 30);
        assert_eq!(record.timestamp, now());
        assert!(record.tag.is_empty());
        assert_eq!(record.content, "yesterday at noon host app: hi");
    }

    #[test]
    fn test_decode_header_without_tag() {
        let record = decode("<30>Oct 11 22:14:15 host");
        assert_eq!(record.hostname, "host");
        assert!(record.tag.is_empty());
        assert!(record.content.is_empty());
    }

    #[test]
    fn test_decode_empty_frame() {
        let decoder = Rfc3164Decoder::default();
        assert_eq!(
            decoder.decode_at(b"", peer(), now()).unwrap_err(),
            DecodeError::Empty
        );
        assert_eq!(
            decoder.decode_at(b"\r\n", peer(), now()).unwrap_err(),
            DecodeError::Empty
        );
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let err = Rfc3164Decoder::default()
            .decode_at(&[0xff, 0xfe, 0xfd], peer(), now())
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidUtf8(_)));
    }

    #[test]
    fn test_decode_oversized() {
        let decoder = Rfc3164Decoder::new(16);
        let err = decoder
            .decode_at(b"<13>Oct 11 22:14:15 host tag: too long", peer(), now())
            .unwrap_err();
        assert_eq!(err, DecodeError::Oversized { size: 38, max: 16 });
    }

    proptest! {
        #[test]
        fn decode_never_panics(frame in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = Rfc3164Decoder::default().decode_at(&frame, peer(), now());
        }

        #[test]
        fn decode_keeps_valid_priority(priority in 0u8..192, content in "[a-z ]{1,40}") {
            let frame = format!("<{priority}>Oct 11 22:14:15 host tag: {content}");
            let record = decode(&frame);
            prop_assert_eq!(record.priority, priority);
            prop_assert_eq!(record.facility, priority / 8);
            prop_assert_eq!(record.severity, priority % 8);
        }
    }
}
