use crate::error::{LwacpError, Result};

/// Protocol marker byte following the length byte of every LWACP frame.
pub const MARKER: u8 = 0x01;

/// Largest parameter payload that keeps the length byte within `u8`.
pub const MAX_PARAMS: usize = u8::MAX as usize - 2;

/// An LWACP frame.
///
/// Wire format:
/// ```text
/// [total_length] [0x01] [command_id] [param_0 .. param_n-1]
/// ```
///
/// Where `total_length` = 2 + n (marker + command_id + params); the length byte
/// itself is not counted. There is no checksum and no per-command ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LwacpFrame {
    command_id: u8,
    params: Vec<u8>,
}

impl LwacpFrame {
    /// Build a frame, rejecting payloads the length byte cannot describe.
    pub fn encode(command_id: u8, params: &[u8]) -> Result<Self> {
        if params.len() > MAX_PARAMS {
            return Err(LwacpError::ParameterTooLarge(params.len()));
        }
        Ok(Self {
            command_id,
            params: params.to_vec(),
        })
    }

    pub fn command_id(&self) -> u8 {
        self.command_id
    }

    pub fn params(&self) -> &[u8] {
        &self.params
    }

    /// Value of the length byte.
    pub fn total_length(&self) -> u8 {
        // Bounded by MAX_PARAMS in encode()
        (self.params.len() + 2) as u8
    }

    /// Serialize this frame for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.params.len());
        out.push(self.total_length());
        out.push(MARKER);
        out.push(self.command_id);
        out.extend_from_slice(&self.params);
        out
    }

    /// Parse a frame from a raw capture. Only used for diagnostics.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 3 {
            return Err(LwacpError::MalformedFrame(format!(
                "frame too short: {} bytes",
                data.len()
            )));
        }

        let declared = data[0] as usize;
        let expected = data.len() - 1;
        if declared != expected {
            return Err(LwacpError::MalformedFrame(format!(
                "length byte {} does not match {} trailing bytes",
                declared, expected
            )));
        }

        if data[1] != MARKER {
            return Err(LwacpError::MalformedFrame(format!(
                "invalid protocol marker: 0x{:02X}",
                data[1]
            )));
        }

        Ok(Self {
            command_id: data[2],
            params: data[3..].to_vec(),
        })
    }
}

impl std::fmt::Display for LwacpFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cmd={:02X}", self.command_id)?;
        if !self.params.is_empty() {
            write!(f, " params={}", hex::encode(&self.params))?;
        }
        Ok(())
    }
}

/// Scan a query response for `command_id` and return the byte that follows it.
///
/// Responses look like `[len] [00] [00] [01] [cmd_id] [value]` but are not
/// reliably framed, so this searches instead of decoding.
pub fn find_value(response: &[u8], command_id: u8) -> Option<u8> {
    response
        .windows(2)
        .find(|pair| pair[0] == command_id)
        .map(|pair| pair[1])
}

/// Hex helpers shared by the CLI, logs and raw command surface.
pub mod hex {
    use crate::error::{LwacpError, Result};

    /// Space-separated uppercase hex, e.g. `03 01 64 01`.
    pub fn spaced(data: &[u8]) -> String {
        data.iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn encode(data: &[u8]) -> String {
        ::hex::encode(data)
    }

    /// Parse operator-supplied hex. Whitespace, `:` and `-` separators are ignored.
    pub fn parse(input: &str) -> Result<Vec<u8>> {
        let digits: String = input
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
            .collect();
        ::hex::decode(&digits)
            .map_err(|e| LwacpError::invalid("raw", format!("invalid hex '{}': {}", input, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_layouts() {
        let eq = LwacpFrame::encode(0x64, &[0x01]).unwrap();
        assert_eq!(eq.to_bytes(), vec![0x03, 0x01, 0x64, 0x01]);

        let battery = LwacpFrame::encode(0x6B, &[]).unwrap();
        assert_eq!(battery.to_bytes(), vec![0x02, 0x01, 0x6B]);

        let volume = LwacpFrame::encode(0xBB, &[0x01, 0x01]).unwrap();
        assert_eq!(volume.to_bytes(), vec![0x04, 0x01, 0xBB, 0x01, 0x01]);
    }

    #[test]
    fn test_roundtrip() {
        for len in [0usize, 1, 2, 32, 128, MAX_PARAMS] {
            let params: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let frame = LwacpFrame::encode(0x72, &params).unwrap();
            let parsed = LwacpFrame::decode(&frame.to_bytes()).unwrap();
            assert_eq!(parsed.command_id(), 0x72);
            assert_eq!(parsed.params(), params.as_slice());
        }
    }

    #[test]
    fn test_max_payload_fills_length_byte() {
        let frame = LwacpFrame::encode(0x72, &[0u8; MAX_PARAMS]).unwrap();
        assert_eq!(frame.total_length(), 0xFF);
        assert_eq!(frame.to_bytes().len(), 256);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let err = LwacpFrame::encode(0x72, &[0u8; MAX_PARAMS + 1]).unwrap_err();
        assert!(matches!(err, LwacpError::ParameterTooLarge(254)));
    }

    #[test]
    fn test_decode_too_short() {
        assert!(matches!(
            LwacpFrame::decode(&[0x02, 0x01]),
            Err(LwacpError::MalformedFrame(_))
        ));
        assert!(LwacpFrame::decode(&[]).is_err());
    }

    #[test]
    fn test_decode_length_mismatch() {
        // Declares one param but carries two
        let err = LwacpFrame::decode(&[0x03, 0x01, 0xBB, 0x01, 0x01]).unwrap_err();
        assert!(matches!(err, LwacpError::MalformedFrame(_)));
    }

    #[test]
    fn test_decode_bad_marker() {
        let err = LwacpFrame::decode(&[0x02, 0x00, 0x6B]).unwrap_err();
        assert!(matches!(err, LwacpError::MalformedFrame(_)));
    }

    #[test]
    fn test_find_value_in_query_response() {
        let resp = [0x05, 0x00, 0x00, 0x01, 0x64, 0x02];
        assert_eq!(find_value(&resp, 0x64), Some(0x02));
        assert_eq!(find_value(&resp, 0x65), None);
        // Command id as the final byte has no value after it
        assert_eq!(find_value(&[0x00, 0x64], 0x64), None);
    }

    #[test]
    fn test_hex_parse_and_format() {
        let bytes = hex::parse("03 01 64 01").unwrap();
        assert_eq!(bytes, vec![0x03, 0x01, 0x64, 0x01]);
        assert_eq!(hex::parse("0301").unwrap(), vec![0x03, 0x01]);
        assert_eq!(hex::spaced(&bytes), "03 01 64 01");
        assert!(hex::parse("031").is_err());
        assert!(hex::parse("zz").is_err());
        assert_eq!(hex::parse("88:C6-26").unwrap(), vec![0x88, 0xC6, 0x26]);
    }

    #[test]
    fn test_hex_parse_rejects_non_ascii() {
        for input in ["aéb", "éé", "64 01 日本", "0x64"] {
            let err = hex::parse(input).unwrap_err();
            assert!(
                matches!(err, LwacpError::InvalidParameter { .. }),
                "{}: {:?}",
                input,
                err
            );
        }
    }

    #[test]
    fn test_display() {
        let frame = LwacpFrame::encode(0x6C, &[0x60, 0xC0]).unwrap();
        assert_eq!(frame.to_string(), "cmd=6C params=60c0");
    }
}
