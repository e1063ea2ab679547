//! ---
//! zl_section: "03-wire-codec"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Single-frame parser and formatter."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::fmt::Write as _;

use zilla_telemetry::{ControllerStatus, ErrorCode, MetricsDelta, UnitInterval};

use crate::error::DecodeError;

/// XOR of every byte, as used by the trailing `*HH` checksum.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Parse one frame (terminator already removed) into a delta.
///
/// Frames are atomic: one bad recognised value discards the whole frame.
/// Unknown keys are skipped, but at least one recognised key is required.
pub fn parse_frame(line: &[u8]) -> Result<MetricsDelta, DecodeError> {
    if !line.is_ascii() {
        return Err(DecodeError::malformed("non-ascii content"));
    }
    let text = std::str::from_utf8(line).map_err(|_| DecodeError::malformed("invalid utf-8"))?;
    let body = verify_checksum(text)?;

    let mut delta = MetricsDelta::default();
    let mut recognised = 0usize;
    for token in body
        .split(|c: char| c == ',' || c.is_ascii_whitespace())
        .filter(|token| !token.is_empty())
    {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| DecodeError::malformed(format!("token '{token}' has no '='")))?;
        if apply_field(&mut delta, key, value.trim())? {
            recognised += 1;
        } else {
            tracing::trace!(key, "skipping unknown telemetry key");
        }
    }

    if recognised == 0 {
        return Err(DecodeError::malformed("no recognised fields"));
    }
    Ok(delta)
}

/// Format a delta as a wire frame, including the `\n` terminator.
///
/// Used by device emulators and capture tooling.
pub fn encode_frame(delta: &MetricsDelta, with_checksum: bool) -> String {
    let mut fields: Vec<String> = Vec::new();
    if let Some(v) = delta.battery_voltage {
        fields.push(format!("BV={v}"));
    }
    if let Some(v) = delta.battery_current {
        fields.push(format!("BA={v}"));
    }
    if let Some(v) = delta.motor_voltage {
        fields.push(format!("MV={v}"));
    }
    if let Some(v) = delta.motor_current {
        fields.push(format!("MA={v}"));
    }
    if let Some(v) = delta.motor_speed {
        fields.push(format!("RPM={v}"));
    }
    if let Some(v) = delta.controller_status {
        fields.push(format!("ST={}", v.to_string().to_ascii_uppercase()));
    }
    if let Some(v) = delta.accelerator_position {
        fields.push(format!("AP={}", v.get()));
    }
    if let Some(v) = delta.precharge_status {
        fields.push(format!("PC={}", u8::from(v)));
    }
    if let Some(v) = delta.reverse_mode {
        fields.push(format!("RV={}", u8::from(v)));
    }
    if let Some(v) = delta.valet_mode {
        fields.push(format!("VM={}", u8::from(v)));
    }
    if let Some(codes) = &delta.error_codes {
        let joined = codes
            .iter()
            .map(|code| code.code().to_string())
            .collect::<Vec<_>>()
            .join(";");
        fields.push(format!("ERR={}", if joined.is_empty() { "0" } else { &joined }));
    }
    if let Some(v) = delta.battery_low {
        fields.push(format!("BL={}", u8::from(v)));
    }
    if let Some(v) = delta.main_contactor_drop {
        fields.push(format!("CD={v}"));
    }

    let mut frame = fields.join(",");
    if with_checksum {
        let sum = checksum(frame.as_bytes());
        let _ = write!(frame, "*{sum:02X}");
    }
    frame.push('\n');
    frame
}

fn verify_checksum(text: &str) -> Result<&str, DecodeError> {
    let Some((body, suffix)) = text.rsplit_once('*') else {
        return Ok(text);
    };
    let suffix = suffix.trim();
    if suffix.len() != 2 {
        return Err(DecodeError::malformed("checksum must be two hex digits"));
    }
    let actual = u8::from_str_radix(suffix, 16)
        .map_err(|_| DecodeError::malformed(format!("invalid checksum '{suffix}'")))?;
    let expected = checksum(body.as_bytes());
    if expected != actual {
        return Err(DecodeError::ChecksumMismatch { expected, actual });
    }
    Ok(body)
}

/// Returns `Ok(false)` for keys this decoder does not know.
fn apply_field(delta: &mut MetricsDelta, key: &str, value: &str) -> Result<bool, DecodeError> {
    match key.to_ascii_uppercase().as_str() {
        "BV" => delta.battery_voltage = Some(parse_float(key, value)?),
        "BA" => delta.battery_current = Some(parse_float(key, value)?),
        "MV" => delta.motor_voltage = Some(parse_float(key, value)?),
        "MA" => delta.motor_current = Some(parse_float(key, value)?),
        "RPM" => {
            delta.motor_speed = Some(value.parse::<i32>().map_err(|_| invalid(key, value))?)
        }
        "ST" => delta.controller_status = Some(parse_status(key, value)?),
        "AP" => delta.accelerator_position = Some(UnitInterval::new(parse_float(key, value)?)),
        "PC" => delta.precharge_status = Some(parse_flag(key, value)?),
        "RV" => delta.reverse_mode = Some(parse_flag(key, value)?),
        "VM" => delta.valet_mode = Some(parse_flag(key, value)?),
        "BL" => delta.battery_low = Some(parse_flag(key, value)?),
        "CD" => delta.main_contactor_drop = Some(parse_float(key, value)?),
        "ERR" => delta.error_codes = Some(parse_error_codes(key, value)?),
        _ => return Ok(false),
    }
    Ok(true)
}

fn invalid(key: &str, value: &str) -> DecodeError {
    DecodeError::malformed(format!("invalid value '{value}' for {key}"))
}

fn parse_float(key: &str, value: &str) -> Result<f32, DecodeError> {
    value
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid(key, value))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, DecodeError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "y" => Ok(true),
        "0" | "false" | "off" | "n" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn parse_status(key: &str, value: &str) -> Result<ControllerStatus, DecodeError> {
    if let Ok(code) = value.parse::<u8>() {
        return ControllerStatus::from_wire_code(code).ok_or_else(|| invalid(key, value));
    }
    value.parse::<ControllerStatus>().map_err(|_| invalid(key, value))
}

fn parse_error_codes(key: &str, value: &str) -> Result<BTreeSet<ErrorCode>, DecodeError> {
    let mut codes = BTreeSet::new();
    if value.is_empty() || value == "-" {
        return Ok(codes);
    }
    for raw in value.split(';').filter(|part| !part.is_empty()) {
        let code = raw.parse::<u16>().map_err(|_| invalid(key, value))?;
        let code = ErrorCode::from_code(code);
        if code.is_fault() {
            codes.insert(code);
        }
    }
    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_frame() {
        let delta = parse_frame(
            b"BV=120.5,BA=50,MV=118,MA=40.25,RPM=2000,ST=RUNNING,AP=0.5,PC=1,RV=0,VM=off,ERR=1;4,BL=n,CD=0.3",
        )
        .expect("valid frame");
        assert_eq!(delta.battery_voltage, Some(120.5));
        assert_eq!(delta.motor_current, Some(40.25));
        assert_eq!(delta.motor_speed, Some(2000));
        assert_eq!(delta.controller_status, Some(ControllerStatus::Running));
        assert_eq!(delta.accelerator_position, Some(UnitInterval::new(0.5)));
        assert_eq!(delta.precharge_status, Some(true));
        assert_eq!(delta.valet_mode, Some(false));
        assert_eq!(
            delta.error_codes,
            Some(BTreeSet::from([ErrorCode::Overcurrent, ErrorCode::Overtemperature]))
        );
        assert_eq!(delta.field_count(), 13);
    }

    #[test]
    fn partial_frame_with_whitespace_and_lowercase_keys() {
        let delta = parse_frame(b"rpm=1500  st=2").expect("valid frame");
        assert_eq!(delta.motor_speed, Some(1500));
        assert_eq!(delta.controller_status, Some(ControllerStatus::Running));
        assert_eq!(delta.field_count(), 2);
    }

    #[test]
    fn accelerator_is_clamped() {
        let delta = parse_frame(b"AP=1.8").expect("valid frame");
        assert_eq!(delta.accelerator_position.map(UnitInterval::get), Some(1.0));
    }

    #[test]
    fn unknown_error_codes_map_to_sentinel_and_zero_clears() {
        let delta = parse_frame(b"ERR=42").expect("valid frame");
        assert_eq!(
            delta.error_codes,
            Some(BTreeSet::from([ErrorCode::UnknownError]))
        );
        let cleared = parse_frame(b"ERR=0").expect("valid frame");
        assert_eq!(cleared.error_codes, Some(BTreeSet::new()));
    }

    #[test]
    fn unknown_keys_are_skipped_but_not_sufficient() {
        let delta = parse_frame(b"TEMP=55,BV=119").expect("valid frame");
        assert_eq!(delta.field_count(), 1);
        assert!(matches!(
            parse_frame(b"TEMP=55"),
            Err(DecodeError::MalformedFrame(_))
        ));
    }

    #[test]
    fn rejects_bad_values_atomically() {
        for line in [
            &b"BV=12x"[..],
            &b"BV=120,RPM=fast"[..],
            &b"ST=9"[..],
            &b"AP=NaN"[..],
            &b"PC=maybe"[..],
            &b"BV"[..],
            &b"\xffBV=1"[..],
        ] {
            assert!(
                matches!(parse_frame(line), Err(DecodeError::MalformedFrame(_))),
                "expected malformed for {:?}",
                String::from_utf8_lossy(line)
            );
        }
    }

    #[test]
    fn checksum_is_verified_when_present() {
        let body = "BV=120,RPM=2000";
        let framed = format!("{body}*{:02X}", checksum(body.as_bytes()));
        assert_eq!(
            parse_frame(framed.as_bytes()).expect("valid").motor_speed,
            Some(2000)
        );

        let wrong = format!("{body}*{:02X}", checksum(body.as_bytes()) ^ 0xFF);
        assert!(matches!(
            parse_frame(wrong.as_bytes()),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
        assert!(matches!(
            parse_frame(b"BV=120*Z"),
            Err(DecodeError::MalformedFrame(_))
        ));
    }

    #[test]
    fn encoded_frames_parse_back() {
        let delta = MetricsDelta {
            battery_voltage: Some(121.25),
            motor_speed: Some(2450),
            controller_status: Some(ControllerStatus::Precharge),
            error_codes: Some(BTreeSet::from([ErrorCode::Stall])),
            reverse_mode: Some(true),
            ..MetricsDelta::default()
        };
        let frame = encode_frame(&delta, true);
        assert!(frame.ends_with('\n'));
        let parsed = parse_frame(frame.trim_end().as_bytes()).expect("valid frame");
        assert_eq!(parsed, delta);
    }
}
