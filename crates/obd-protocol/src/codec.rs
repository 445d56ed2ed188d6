//! ELM327 Command Codec
//!
//! Pure functions building adapter commands and decoding the ASCII replies.
//! Nothing in here holds state; framing lives in [`crate::ResponseAssembler`].

use crate::catalog::{DecodedResponse, Parameter};
use crate::protocol::ObdProtocol;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Prompt the adapter prints when it is ready for the next command
pub const PROMPT: char = '>';

/// Line terminator the adapter expects after every command
pub const LINE_TERMINATOR: char = '\r';

/// Tokens that mark a reply carrying no usable data
const FAILURE_TOKENS: [&str; 3] = ["NO DATA", "ERROR", "SEARCHING..."];

/// Width of one support bitmap range (PIDs base+1 ..= base+0x20)
pub const SUPPORT_RANGE: u8 = 0x20;

/// Build the request for a parameter: `<mode><pid>`, e.g. `010C`
pub fn build_request(parameter: &Parameter) -> String {
    format!("{:02X}{}", parameter.mode, parameter.id)
}

/// Build the support bitmap request for the range starting at `base` (`0100`, `0120`, ...)
pub fn build_support_request(base: u8) -> String {
    format!("01{:02X}", base)
}

/// Adapter setup handshake with automatic protocol detection
pub fn init_sequence() -> Vec<String> {
    init_sequence_for(ObdProtocol::Auto)
}

/// Adapter setup handshake pinned to `protocol`
///
/// Reset, echo off, linefeeds off, spaces off, headers off, adaptive timing on,
/// protocol selection, then a first support probe that also wakes the bus.
pub fn init_sequence_for(protocol: ObdProtocol) -> Vec<String> {
    let mut sequence: Vec<String> = ["ATZ", "ATE0", "ATL0", "ATS0", "ATH0", "ATAT1"]
        .iter()
        .map(|command| command.to_string())
        .collect();
    sequence.push(protocol.select_command());
    sequence.push(build_support_request(0x00));
    sequence
}

/// Append the line terminator
pub fn finalize(command: &str) -> String {
    let mut line = String::with_capacity(command.len() + 1);
    line.push_str(command);
    line.push(LINE_TERMINATOR);
    line
}

/// True if the reply contains the prompt or an `OK`
pub fn is_adapter_ready(text: &str) -> bool {
    text.contains(PROMPT) || text.contains("OK")
}

/// True if the reply carries one of the no-data sentinels
pub fn is_failure_response(text: &str) -> bool {
    FAILURE_TOKENS.iter().any(|token| text.contains(token))
}

/// Hex prefix of a positive reply in `mode` (`41` for mode 01)
pub fn response_prefix(mode: u8) -> String {
    format!("{:02X}", mode.wrapping_add(0x40))
}

/// Parse hex pairs until the first unparsable or incomplete pair
pub fn parse_hex_bytes(payload: &str) -> Vec<u8> {
    payload
        .as_bytes()
        .chunks(2)
        .map_while(|pair| match pair {
            [hi, lo] if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                Some(hex_value(*hi) << 4 | hex_value(*lo))
            }
            _ => None,
        })
        .collect()
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

fn compact(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Decode a complete reply for `parameter`
///
/// Returns `None` on no-data sentinels, when the PID cannot be found in the reply,
/// or when the payload is shorter than the parameter's byte width.
pub fn decode(text: &str, parameter: &Arc<Parameter>) -> Option<DecodedResponse> {
    let trimmed = text.trim();
    if is_failure_response(trimmed) {
        debug!("No data for PID {}: {:?}", parameter.id, trimmed);
        return None;
    }

    let compact = compact(trimmed);
    let header = format!("{}{}", response_prefix(parameter.mode), parameter.id);
    let payload_start = match compact.find(&header) {
        Some(at) => at + header.len(),
        None => compact.find(parameter.id.as_str())? + parameter.id.len(),
    };

    let raw_bytes = parse_hex_bytes(&compact[payload_start..]);
    let response = DecodedResponse::new(Arc::clone(parameter), raw_bytes, unix_millis());
    if response.value.is_none() {
        debug!(
            "PID {} reply too short: {} of {} bytes",
            parameter.id,
            response.raw_bytes.len(),
            parameter.byte_width
        );
        return None;
    }
    Some(response)
}

/// Check the `0100` support bitmap for `pid` (1..=0x20)
pub fn is_command_supported(text: &str, pid: u8) -> bool {
    is_command_supported_in_range(text, 0x00, pid)
}

/// Check a support bitmap reply for the range starting at `base` for `pid`
///
/// The reply is `41 <base> A B C D`; bit 7 of A is PID base+1, bit 0 of D is base+0x20.
pub fn is_command_supported_in_range(text: &str, base: u8, pid: u8) -> bool {
    let trimmed = text.trim();
    if !trimmed.starts_with('4') || pid <= base || pid - base > SUPPORT_RANGE {
        return false;
    }

    let bytes = parse_hex_bytes(&compact(trimmed));
    let offset = (pid - base - 1) as usize;
    // Skip the echoed mode and PID bytes
    let byte_index = offset / 8 + 2;
    let bit_position = 7 - (offset % 8);

    bytes
        .get(byte_index)
        .is_some_and(|byte| byte & (1 << bit_position) != 0)
}

/// Wall clock in Unix milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ParameterCatalog;
    use proptest::prelude::*;

    fn param(id: &str) -> Arc<Parameter> {
        ParameterCatalog::standard().get(id).unwrap().clone()
    }

    #[test]
    fn test_build_request() {
        assert_eq!(build_request(&param("0C")), "010C");
        assert_eq!(build_support_request(0x20), "0120");
        assert_eq!(finalize("010C"), "010C\r");
    }

    #[test]
    fn test_init_sequence() {
        assert_eq!(
            init_sequence(),
            vec!["ATZ", "ATE0", "ATL0", "ATS0", "ATH0", "ATAT1", "ATSP0", "0100"]
        );
        let pinned = init_sequence_for(ObdProtocol::Iso15765_4Can11bit500);
        assert_eq!(pinned[6], "ATSP6");
        assert_eq!(pinned.len(), 8);
    }

    #[test]
    fn test_adapter_ready() {
        assert!(is_adapter_ready("ELM327 v1.5\r\r>"));
        assert!(is_adapter_ready("OK"));
        assert!(!is_adapter_ready("ELM327 v1.5"));
        assert!(!is_adapter_ready(""));
    }

    #[test]
    fn test_decode_compact_and_spaced_replies() {
        let rpm = param("0C");
        let compact = decode("410C0FA0\r\r>", &rpm).unwrap();
        assert_eq!(compact.value, Some(1000.0));
        assert_eq!(compact.raw_bytes, vec![0x0F, 0xA0]);

        let spaced = decode("41 0C 0F A0 \r\r>", &rpm).unwrap();
        assert_eq!(spaced.value, Some(1000.0));
    }

    #[test]
    fn test_decode_prefers_echoed_header() {
        // "0D" also occurs inside the data bytes; the header match wins
        let speed = param("0D");
        let response = decode("410D0D", &speed).unwrap();
        assert_eq!(response.value, Some(13.0));
    }

    #[test]
    fn test_decode_falls_back_to_bare_pid() {
        let temp = param("05");
        assert_eq!(decode("057A", &temp).unwrap().value, Some(82.0));
    }

    #[test]
    fn test_decode_sentinels() {
        let rpm = param("0C");
        assert!(decode("NO DATA", &rpm).is_none());
        assert!(decode("410C0FA0 NO DATA >", &rpm).is_none());
        assert!(decode("SEARCHING...\r410C0FA0", &rpm).is_none());
        assert!(decode("CAN ERROR", &rpm).is_none());
    }

    #[test]
    fn test_decode_missing_pid_or_short_payload() {
        let rpm = param("0C");
        assert!(decode("410D20", &rpm).is_none());
        assert!(decode("410C0F", &rpm).is_none());
        assert!(decode("", &rpm).is_none());
    }

    #[test]
    fn test_parse_hex_stops_at_garbage() {
        assert_eq!(parse_hex_bytes("0FA0>"), vec![0x0F, 0xA0]);
        assert_eq!(parse_hex_bytes("0FZ0A0"), vec![0x0F]);
        assert_eq!(parse_hex_bytes("0F+1"), vec![0x0F]);
        assert_eq!(parse_hex_bytes("abc"), vec![0xAB]);
    }

    #[test]
    fn test_support_bitmap_msb_first() {
        // 0xBE = 1011_1110: bit 7 is PID 01, bit 0 is PID 08
        let reply = "41 00 BE 1F A8 13";
        let supported: Vec<u8> = (1..=8).filter(|&pid| is_command_supported(reply, pid)).collect();
        assert_eq!(supported, vec![1, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_support_bitmap_unspaced_reply() {
        assert!(is_command_supported("4100BE1FA813\r\r>", 0x0C));
        // 0x13 = 0001_0011: PID 0x20 (next range available) and 0x1F set, 0x1E clear
        assert!(is_command_supported("4100BE1FA813", 0x20));
        assert!(is_command_supported("4100BE1FA813", 0x1F));
        assert!(!is_command_supported("4100BE1FA813", 0x1E));
    }

    #[test]
    fn test_support_bitmap_rejects_malformed() {
        assert!(!is_command_supported("NO DATA", 2));
        assert!(!is_command_supported("41 00 BE", 0x0C));
        assert!(!is_command_supported("41 00 BE 1F A8 13", 0));
        assert!(!is_command_supported("41 00 BE 1F A8 13", 0x21));
    }

    #[test]
    fn test_support_bitmap_second_range() {
        // 0x5C = base 0x40 + 0x1C: byte D, bit 4
        let reply = "41 40 00 00 00 10";
        assert!(is_command_supported_in_range(reply, 0x40, 0x5C));
        assert!(!is_command_supported_in_range(reply, 0x40, 0x5B));
        assert!(!is_command_supported_in_range(reply, 0x40, 0x40));
    }

    proptest! {
        #[test]
        fn prop_short_payload_decodes_to_none(
            index in 0usize..12,
            bytes in proptest::collection::vec(any::<u8>(), 0..4),
        ) {
            let catalog = ParameterCatalog::standard();
            let parameter = catalog.iter().nth(index).unwrap().clone();
            let bytes: Vec<u8> = bytes.into_iter().take(parameter.byte_width.saturating_sub(1)).collect();
            let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
            let reply = format!("{}{}", response_prefix(parameter.mode), parameter.id) + &hex;
            prop_assert!(decode(&reply, &parameter).is_none());
        }

        #[test]
        fn prop_bitmap_matches_bit_arithmetic(bitmap in any::<u32>(), pid in 1u8..=32) {
            let reply = format!(
                "41 00 {:02X} {:02X} {:02X} {:02X}",
                bitmap >> 24, (bitmap >> 16) & 0xFF, (bitmap >> 8) & 0xFF, bitmap & 0xFF
            );
            let expected = bitmap & (1 << (32 - pid as u32)) != 0;
            prop_assert_eq!(is_command_supported(&reply, pid), expected);
        }
    }
}
