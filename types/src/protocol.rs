use thiserror::Error;

/// Size of the `u32` length prefix carried by every frame in both
/// directions.
pub const HEADER_SIZE: usize = 4;

/// Upper bound on the bytes following a frame's length prefix. A request
/// declaring more than this is a protocol violation and the connection is
/// closed.
pub const MAX_MSG_SIZE: usize = 4096;

/// Upper bound on the number of arguments in a single request.
pub const MAX_ARGS: usize = 16;

/// All multi-byte integers on the wire are little-endian. There is no
/// network-byte-order conversion on either side; clients that byte-swap
/// their length prefixes are rejected by the ordinary bounds checks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("message of {0} bytes exceeds the {MAX_MSG_SIZE} byte limit")]
    MessageTooLarge(usize),
    #[error("request declares {0} arguments, limit is {MAX_ARGS}")]
    TooManyArgs(u32),
    #[error("request argument runs past the declared frame length")]
    ArgOverrun,
    #[error("{0} trailing bytes after the last request argument")]
    TrailingBytes(usize),
    #[error("reply payload truncated")]
    TruncatedReply,
    #[error("unknown reply tag {0}")]
    UnknownTag(u8),
}

/// Parses the payload of one request frame (everything after the outer
/// length prefix) into an argument vector:
///
/// ```text
/// [u32 nargs] ([u32 len] [raw bytes])*
/// ```
///
/// Every length is validated against the declared frame length and the
/// frame must be fully consumed by the last argument.
pub fn parse_request(payload: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let nargs = read_u32(payload, 0).ok_or(ProtocolError::ArgOverrun)?;
    if nargs as usize > MAX_ARGS {
        return Err(ProtocolError::TooManyArgs(nargs));
    }
    let mut args = Vec::with_capacity(nargs as usize);
    let mut pos = 4usize;
    for _ in 0..nargs {
        let len = read_u32(payload, pos).ok_or(ProtocolError::ArgOverrun)? as usize;
        if len > payload.len() {
            return Err(ProtocolError::ArgOverrun);
        }
        let bytes = payload
            .get(pos + 4..pos + 4 + len)
            .ok_or(ProtocolError::ArgOverrun)?;
        args.push(bytes.to_vec());
        pos += 4 + len;
    }
    if pos != payload.len() {
        return Err(ProtocolError::TrailingBytes(payload.len() - pos));
    }
    Ok(args)
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at + 4)
        .and_then(|s| s.try_into().ok())
        .map(u32::from_le_bytes)
}

/// Encodes an argument vector as one complete request frame, outer length
/// prefix included.
pub fn encode_request<A: AsRef<[u8]>>(args: &[A]) -> Result<Vec<u8>, ProtocolError> {
    if args.len() > MAX_ARGS {
        return Err(ProtocolError::TooManyArgs(args.len() as u32));
    }
    let total: usize = 4 + args.iter().map(|a| 4 + a.as_ref().len()).sum::<usize>();
    if total > MAX_MSG_SIZE {
        return Err(ProtocolError::MessageTooLarge(total));
    }
    let mut frame = Vec::with_capacity(HEADER_SIZE + total);
    frame.extend((total as u32).to_le_bytes());
    frame.extend((args.len() as u32).to_le_bytes());
    for arg in args {
        let arg = arg.as_ref();
        frame.extend((arg.len() as u32).to_le_bytes());
        frame.extend(arg);
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_roundtrip() {
        let frame = encode_request(&["set", "k", "v"]).unwrap();
        let total = u32::from_le_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(total, frame.len() - HEADER_SIZE);
        let args = parse_request(&frame[4..]).unwrap();
        assert_eq!(
            args,
            vec![b"set".to_vec(), b"k".to_vec(), b"v".to_vec()]
        );
    }

    #[test]
    fn empty_argument_vector_parses() {
        let frame = encode_request::<&[u8]>(&[]).unwrap();
        assert_eq!(parse_request(&frame[4..]).unwrap(), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn arg_count_is_capped() {
        let args: Vec<&str> = vec!["x"; MAX_ARGS + 1];
        assert_eq!(
            encode_request(&args),
            Err(ProtocolError::TooManyArgs(17))
        );
        let mut payload = 17u32.to_le_bytes().to_vec();
        payload.extend(1u32.to_le_bytes());
        payload.push(b'x');
        assert_eq!(
            parse_request(&payload),
            Err(ProtocolError::TooManyArgs(17))
        );
    }

    #[test]
    fn argument_may_not_run_past_frame() {
        // one argument claiming 10 bytes but carrying 1
        let mut payload = 1u32.to_le_bytes().to_vec();
        payload.extend(10u32.to_le_bytes());
        payload.push(b'x');
        assert_eq!(parse_request(&payload), Err(ProtocolError::ArgOverrun));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let frame = encode_request(&["get", "k"]).unwrap();
        let mut payload = frame[4..].to_vec();
        payload.push(0);
        assert_eq!(parse_request(&payload), Err(ProtocolError::TrailingBytes(1)));
    }

    #[test]
    fn oversize_request_is_rejected_at_encode() {
        let big = vec![b'a'; MAX_MSG_SIZE];
        assert!(matches!(
            encode_request(&[&big]),
            Err(ProtocolError::MessageTooLarge(_))
        ));
    }
}
