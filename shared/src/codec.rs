//! Binary layout of snapshot frames and transform updates.
//!
//! A record is `u32 id | i32 nameLen | name bytes | f32 x | f32 y | f32 angle`,
//! all little-endian with no padding. A frame is an `i32` record count followed
//! by that many records. Length fields are clamped to `[0, MAX_NAME_LEN]` both
//! ways, so a corrupt header can shorten a name but never push a read past the
//! end of the buffer.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{
    CodecError, PeerRecord, Registration, SessionId, Transform, ACK_SUCCESS, HANDSHAKE_TAG,
    MAX_FRAME_RECORDS, MAX_NAME_LEN, MAX_RECORD_LEN, RECORD_HEADER_LEN, REGISTRATION_ACK_LEN,
    TRANSFORM_LEN,
};

/// Clamps a wire length field to a valid name length.
pub fn clamp_name_len(len: i32) -> usize {
    len.clamp(0, MAX_NAME_LEN as i32) as usize
}

/// Longest prefix of `name` that fits the wire limit without splitting a char.
pub fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Appends one record to `out` and returns the number of bytes written.
pub fn encode_record(record: &PeerRecord, out: &mut Vec<u8>) -> Result<usize, CodecError> {
    let start = out.len();
    let name = truncate_name(&record.name);

    out.extend_from_slice(&record.id.to_le_bytes());
    out.extend_from_slice(&(name.len() as i32).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&encode_transform(&record.transform)?);

    Ok(out.len() - start)
}

/// Decodes one record from the front of `buf`, returning it with the number
/// of bytes consumed.
pub fn decode_record(buf: &[u8]) -> Result<(PeerRecord, usize), CodecError> {
    let header = take(buf, 0, RECORD_HEADER_LEN)?;
    let id = SessionId::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let name_len = clamp_name_len(i32::from_le_bytes([
        header[4], header[5], header[6], header[7],
    ]));

    let name = take(buf, RECORD_HEADER_LEN, name_len)?;
    let transform_start = RECORD_HEADER_LEN + name_len;
    let transform = decode_transform(take(buf, transform_start, TRANSFORM_LEN)?)?;

    let record = PeerRecord {
        id,
        name: String::from_utf8_lossy(name).into_owned(),
        transform,
    };
    Ok((record, transform_start + TRANSFORM_LEN))
}

fn take(buf: &[u8], start: usize, len: usize) -> Result<&[u8], CodecError> {
    buf.get(start..start + len).ok_or(CodecError::Incomplete {
        needed: start + len,
        available: buf.len(),
    })
}

/// Encodes a full snapshot frame: record count followed by every record.
pub fn encode_frame(records: &[PeerRecord]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(4 + records.len() * MAX_RECORD_LEN);
    out.extend_from_slice(&(records.len() as i32).to_le_bytes());
    for record in records {
        encode_record(record, &mut out)?;
    }
    Ok(out)
}

/// Records recovered from a frame buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// Record count announced by the frame header.
    pub declared: usize,
    pub records: Vec<PeerRecord>,
}

impl DecodedFrame {
    /// True when every announced record was decoded.
    pub fn is_complete(&self) -> bool {
        self.records.len() == self.declared
    }
}

/// Decodes a frame buffer, stopping at the announced count or at the first
/// record that does not fit in what is left of the buffer.
pub fn decode_frame(buf: &[u8]) -> Result<DecodedFrame, CodecError> {
    let header = take(buf, 0, 4)?;
    let declared = i32::from_le_bytes([header[0], header[1], header[2], header[3]]).max(0) as usize;

    let mut records = Vec::with_capacity(declared.min(MAX_FRAME_RECORDS));
    let mut cursor = 4;
    while records.len() < declared {
        match decode_record(&buf[cursor..]) {
            Ok((record, consumed)) => {
                records.push(record);
                cursor += consumed;
            }
            Err(CodecError::Incomplete { .. }) => break,
            Err(e) => return Err(e),
        }
    }

    Ok(DecodedFrame { declared, records })
}

/// Reads exactly one frame from a stream.
///
/// Each record's header is read first and its clamped name length sizes the
/// rest, so the stream stays aligned even when a length field is corrupt.
/// The collected bytes are then decoded with [`decode_frame`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<PeerRecord>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let declared = reader.read_i32_le().await?.max(0) as usize;
    if declared > MAX_FRAME_RECORDS {
        return Err(CodecError::TooManyRecords(declared));
    }

    let mut frame = Vec::with_capacity(4 + declared * MAX_RECORD_LEN);
    frame.extend_from_slice(&(declared as i32).to_le_bytes());
    for _ in 0..declared {
        let header = frame.len();
        frame.resize(header + RECORD_HEADER_LEN, 0);
        reader.read_exact(&mut frame[header..]).await?;
        let name_len = clamp_name_len(i32::from_le_bytes([
            frame[header + 4],
            frame[header + 5],
            frame[header + 6],
            frame[header + 7],
        ]));

        let body = frame.len();
        frame.resize(body + name_len + TRANSFORM_LEN, 0);
        reader.read_exact(&mut frame[body..]).await?;
    }

    let decoded = decode_frame(&frame)?;
    if !decoded.is_complete() {
        return Err(CodecError::ShortFrame {
            declared,
            decoded: decoded.records.len(),
        });
    }
    Ok(decoded.records)
}

/// Serializes a transform into its fixed 12-byte little-endian form.
pub fn encode_transform(transform: &Transform) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::serialize(transform)?)
}

pub fn decode_transform(buf: &[u8]) -> Result<Transform, CodecError> {
    let bytes = take(buf, 0, TRANSFORM_LEN)?;
    Ok(bincode::deserialize(bytes)?)
}

/// True if `buf` starts with the handshake tag.
pub fn is_handshake_tag(buf: &[u8]) -> bool {
    buf.starts_with(HANDSHAKE_TAG)
}

pub fn encode_registration(registration: &Registration) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(registration)?)
}

pub fn decode_registration(buf: &[u8]) -> Result<Registration, CodecError> {
    Ok(serde_json::from_slice(buf)?)
}

pub fn encode_registration_ack(id: SessionId) -> [u8; REGISTRATION_ACK_LEN] {
    let id = id.to_le_bytes();
    [ACK_SUCCESS, id[0], id[1], id[2], id[3]]
}

/// Extracts the assigned id from a registration ack.
pub fn decode_registration_ack(buf: &[u8]) -> Result<SessionId, CodecError> {
    let ack = take(buf, 0, REGISTRATION_ACK_LEN)?;
    if ack[0] != ACK_SUCCESS {
        return Err(CodecError::Rejected);
    }
    Ok(SessionId::from_le_bytes([ack[1], ack[2], ack[3], ack[4]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: SessionId, name: &str) -> PeerRecord {
        PeerRecord::new(id, name, Transform::new(1.5, -2.25, 90.0))
    }

    #[test]
    fn test_record_layout() {
        let mut out = Vec::new();
        let written = encode_record(&record(7, "Ann"), &mut out).unwrap();

        assert_eq!(written, RECORD_HEADER_LEN + 3 + TRANSFORM_LEN);
        assert_eq!(&out[0..4], &7u32.to_le_bytes());
        assert_eq!(&out[4..8], &3i32.to_le_bytes());
        assert_eq!(&out[8..11], b"Ann");
        assert_eq!(&out[11..15], &1.5f32.to_le_bytes());
        assert_eq!(&out[15..19], &(-2.25f32).to_le_bytes());
        assert_eq!(&out[19..23], &90.0f32.to_le_bytes());
    }

    #[test]
    fn test_record_roundtrip_preserves_float_bits() {
        let original = PeerRecord::new(3, "Bob", Transform::new(f32::MIN_POSITIVE, -0.0, 1e-7));
        let mut out = Vec::new();
        encode_record(&original, &mut out).unwrap();

        let (decoded, consumed) = decode_record(&out).unwrap();
        assert_eq!(consumed, out.len());
        assert_eq!(decoded.id, 3);
        assert_eq!(decoded.name, "Bob");
        assert_eq!(decoded.transform.x.to_bits(), original.transform.x.to_bits());
        assert_eq!(decoded.transform.y.to_bits(), original.transform.y.to_bits());
        assert_eq!(
            decoded.transform.angle.to_bits(),
            original.transform.angle.to_bits()
        );
    }

    #[test]
    fn test_long_name_truncated_to_limit() {
        let long_name = "x".repeat(350);
        let mut out = Vec::new();
        let written = encode_record(&record(1, &long_name), &mut out).unwrap();
        assert_eq!(written, MAX_RECORD_LEN);

        let (decoded, consumed) = decode_record(&out).unwrap();
        assert_eq!(decoded.name.len(), MAX_NAME_LEN);
        assert_eq!(consumed, MAX_RECORD_LEN);
    }

    #[test]
    fn test_truncate_name_respects_char_boundary() {
        let name = format!("{}é", "a".repeat(MAX_NAME_LEN - 1));
        assert_eq!(name.len(), MAX_NAME_LEN + 1);
        assert_eq!(truncate_name(&name).len(), MAX_NAME_LEN - 1);
    }

    #[test]
    fn test_corrupt_length_field_is_clamped() {
        let mut out = Vec::new();
        encode_record(&record(2, &"n".repeat(MAX_NAME_LEN)), &mut out).unwrap();
        out[4..8].copy_from_slice(&i32::MAX.to_le_bytes());

        let (decoded, _) = decode_record(&out).unwrap();
        assert_eq!(decoded.name.len(), MAX_NAME_LEN);

        out[4..8].copy_from_slice(&(-5i32).to_le_bytes());
        let (decoded, consumed) = decode_record(&out).unwrap();
        assert_eq!(decoded.name, "");
        assert_eq!(consumed, RECORD_HEADER_LEN + TRANSFORM_LEN);
    }

    #[test]
    fn test_truncated_record_is_incomplete() {
        let mut out = Vec::new();
        encode_record(&record(2, "Ann"), &mut out).unwrap();

        for cut in [0, 5, 9, out.len() - 1] {
            match decode_record(&out[..cut]) {
                Err(CodecError::Incomplete { available, .. }) => assert_eq!(available, cut),
                other => panic!("expected incomplete record, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let records = vec![record(1, "Ann"), record(2, "Bob")];
        let frame = encode_frame(&records).unwrap();
        assert_eq!(&frame[0..4], &2i32.to_le_bytes());

        let decoded = read_frame(&mut &frame[..]).await.unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_short_buffer_stops_at_exhaustion() {
        let records = vec![record(1, "Ann"), record(2, "Bob"), record(3, "Cid")];
        let frame = encode_frame(&records).unwrap();
        let cut = frame.len() - 4;

        let decoded = decode_frame(&frame[..cut]).unwrap();
        assert_eq!(decoded.declared, 3);
        assert_eq!(decoded.records.len(), 2);
        assert!(!decoded.is_complete());
    }

    #[test]
    fn test_buffer_with_inflated_count() {
        let mut frame = encode_frame(&[record(1, "Ann")]).unwrap();
        frame[0..4].copy_from_slice(&i32::MAX.to_le_bytes());

        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.records.len(), 1);
        assert!(!decoded.is_complete());
    }

    #[tokio::test]
    async fn test_short_frame_is_an_error() {
        let records = vec![record(1, "Ann"), record(2, "Bob"), record(3, "Cid")];
        let frame = encode_frame(&records).unwrap();
        let cut = frame.len() - 4;

        assert!(matches!(
            read_frame(&mut &frame[..cut]).await,
            Err(CodecError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_frame_with_oversized_name_field() {
        let mut frame = encode_frame(&[record(1, "Ann"), record(2, "Bob")]).unwrap();
        // Second record's length field claims far more than the name limit.
        let second = 4 + RECORD_HEADER_LEN + 3 + TRANSFORM_LEN;
        frame[second + 4..second + 8].copy_from_slice(&i32::MAX.to_le_bytes());
        frame.extend_from_slice(&[b'z'; MAX_NAME_LEN]);

        let decoded = read_frame(&mut &frame[..]).await.unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].id, 2);
        assert!(decoded[1].name.starts_with("Bob"));
    }

    #[tokio::test]
    async fn test_negative_count_reads_empty() {
        let frame = (-3i32).to_le_bytes();
        let decoded = read_frame(&mut &frame[..]).await.unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_transform_is_twelve_le_bytes() {
        let transform = Transform::new(1.0, 2.0, 3.0);
        let bytes = encode_transform(&transform).unwrap();

        assert_eq!(bytes.len(), TRANSFORM_LEN);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3.0f32.to_le_bytes());
        assert_eq!(decode_transform(&bytes).unwrap(), transform);
    }

    #[test]
    fn test_handshake_tag_matching() {
        assert!(is_handshake_tag(b"RoninEngineTCP:v001"));
        assert!(is_handshake_tag(b"RoninEngineTCP:v001 trailing"));
        assert!(!is_handshake_tag(b""));
        assert!(!is_handshake_tag(b"RoninEngine"));
        assert!(!is_handshake_tag(b"RoninEngineTCP:v002"));
    }

    #[test]
    fn test_registration_ack() {
        let ack = encode_registration_ack(0x0102_0304);
        assert_eq!(ack, [1, 4, 3, 2, 1]);
        assert_eq!(decode_registration_ack(&ack).unwrap(), 0x0102_0304);

        assert!(matches!(
            decode_registration_ack(&[0, 1, 0, 0, 0]),
            Err(CodecError::Rejected)
        ));
        assert!(matches!(
            decode_registration_ack(&[1, 1]),
            Err(CodecError::Incomplete { .. })
        ));
    }

    #[test]
    fn test_malformed_registration() {
        assert!(decode_registration(b"").is_err());
        assert!(decode_registration(b"{\"name\":").is_err());
        assert!(decode_registration(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_read_frame_from_stream() {
        let records = vec![record(1, "Ann"), record(2, "Bob")];
        let frame = encode_frame(&records).unwrap();
        let (head, tail) = frame.split_at(10);

        let mut reader = tokio_test::io::Builder::new().read(head).read(tail).build();
        let decoded = read_frame(&mut reader).await.unwrap();
        assert_eq!(decoded, records);
    }

    #[tokio::test]
    async fn test_read_frame_rejects_huge_count() {
        let header = ((MAX_FRAME_RECORDS + 1) as i32).to_le_bytes();
        let mut reader = tokio_test::io::Builder::new().read(&header).build();

        assert!(matches!(
            read_frame(&mut reader).await,
            Err(CodecError::TooManyRecords(_))
        ));
    }
}
