use crate::protocol::{HEADER_SIZE, MAX_MSG_SIZE, ProtocolError};

const TAG_NIL: u8 = 0;
const TAG_ERR: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_ARR: u8 = 4;
const TAG_DBL: u8 = 5;

/// Error code carried by `Reply::Err`. Only the generic code is produced
/// today; the field is a signed 32-bit slot on the wire.
pub const RES_ERR: i32 = 1;

/// A tagged reply value. The first payload byte names the variant, which
/// lets the decoder walk the tree recursively; arrays are flat-streamed
/// (a count followed by that many nested values, no per-array length).
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Err { code: i32, message: String },
    Str(Vec<u8>),
    Int(i64),
    Arr(Vec<Reply>),
    Dbl(f64),
}

impl Reply {
    pub fn err(message: impl Into<String>) -> Self {
        Reply::Err {
            code: RES_ERR,
            message: message.into(),
        }
    }

    pub fn str(bytes: impl Into<Vec<u8>>) -> Self {
        Reply::Str(bytes.into())
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Nil => out.push(TAG_NIL),
            Reply::Err { code, message } => {
                out.push(TAG_ERR);
                out.extend(code.to_le_bytes());
                out.extend((message.len() as u32).to_le_bytes());
                out.extend(message.as_bytes());
            }
            Reply::Str(bytes) => {
                out.push(TAG_STR);
                out.extend((bytes.len() as u32).to_le_bytes());
                out.extend(bytes.iter());
            }
            Reply::Int(v) => {
                out.push(TAG_INT);
                out.extend(v.to_le_bytes());
            }
            Reply::Arr(items) => {
                out.push(TAG_ARR);
                out.extend((items.len() as u32).to_le_bytes());
                for item in items {
                    item.encode_into(out);
                }
            }
            Reply::Dbl(v) => {
                out.push(TAG_DBL);
                out.extend(v.to_le_bytes());
            }
        }
    }

    /// Encodes the bare payload, without the outer length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    /// Encodes one complete response frame. A payload larger than
    /// `MAX_MSG_SIZE` is replaced wholesale by an error reply so the frame
    /// always fits the peer's bounded read buffer.
    pub fn encode_frame(&self) -> Vec<u8> {
        let mut payload = self.encode();
        if payload.len() > MAX_MSG_SIZE {
            payload = Reply::err("response is too big").encode();
        }
        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend((payload.len() as u32).to_le_bytes());
        frame.extend(payload.iter());
        frame
    }

    /// Decodes one value from the head of `payload`, returning it with the
    /// number of bytes consumed. Nested array elements are consumed in
    /// order, accumulating the byte count.
    pub fn decode(payload: &[u8]) -> Result<(Reply, usize), ProtocolError> {
        let (&tag, rest) = payload.split_first().ok_or(ProtocolError::TruncatedReply)?;
        match tag {
            TAG_NIL => Ok((Reply::Nil, 1)),
            TAG_ERR => {
                let code = i32::from_le_bytes(take::<4>(rest, 0)?);
                let len = u32::from_le_bytes(take::<4>(rest, 4)?) as usize;
                let bytes = rest.get(8..8 + len).ok_or(ProtocolError::TruncatedReply)?;
                let message = String::from_utf8_lossy(bytes).into_owned();
                Ok((Reply::Err { code, message }, 1 + 8 + len))
            }
            TAG_STR => {
                let len = u32::from_le_bytes(take::<4>(rest, 0)?) as usize;
                let bytes = rest.get(4..4 + len).ok_or(ProtocolError::TruncatedReply)?;
                Ok((Reply::Str(bytes.to_vec()), 1 + 4 + len))
            }
            TAG_INT => Ok((Reply::Int(i64::from_le_bytes(take::<8>(rest, 0)?)), 1 + 8)),
            TAG_ARR => {
                let n = u32::from_le_bytes(take::<4>(rest, 0)?);
                let mut consumed = 1 + 4;
                let mut items = Vec::with_capacity(n.min(MAX_MSG_SIZE as u32) as usize);
                for _ in 0..n {
                    let (item, used) = Reply::decode(&payload[consumed..])?;
                    items.push(item);
                    consumed += used;
                }
                Ok((Reply::Arr(items), consumed))
            }
            TAG_DBL => Ok((Reply::Dbl(f64::from_le_bytes(take::<8>(rest, 0)?)), 1 + 8)),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

fn take<const N: usize>(bytes: &[u8], at: usize) -> Result<[u8; N], ProtocolError> {
    bytes
        .get(at..at + N)
        .and_then(|s| s.try_into().ok())
        .ok_or(ProtocolError::TruncatedReply)
}
