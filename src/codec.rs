//! Binary save/replay encoding for movement state.
//!
//! Every blob starts with a `u16` format version, followed by the bincode
//! (standard config) encoding of the payload.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub const FORMAT_VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("format version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u16, expected: u16 },

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let config = bincode::config::standard();
    let mut out = bincode::serde::encode_to_vec(FORMAT_VERSION, config)?;
    out.extend(bincode::serde::encode_to_vec(value, config)?);
    Ok(out)
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    let config = bincode::config::standard();
    let (found, header_len): (u16, usize) = bincode::serde::decode_from_slice(data, config)?;
    if found != FORMAT_VERSION {
        return Err(CodecError::VersionMismatch {
            found,
            expected: FORMAT_VERSION,
        });
    }
    let payload = &data[header_len..];
    let (value, read) = bincode::serde::decode_from_slice(payload, config)?;
    if read != payload.len() {
        return Err(CodecError::TrailingBytes(payload.len() - read));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_header_is_checked() {
        let mut bytes = bincode::serde::encode_to_vec(FORMAT_VERSION + 1, bincode::config::standard())
            .unwrap();
        bytes.extend(bincode::serde::encode_to_vec(7u32, bincode::config::standard()).unwrap());
        match decode::<u32>(&bytes) {
            Err(CodecError::VersionMismatch { found, expected }) => {
                assert_eq!(found, FORMAT_VERSION + 1);
                assert_eq!(expected, FORMAT_VERSION);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = encode(&(1u8, 2u8)).unwrap();
        bytes.push(9);
        assert!(matches!(decode::<(u8, u8)>(&bytes), Err(CodecError::TrailingBytes(1))));
        assert!(matches!(decode::<u32>(&[]), Err(CodecError::Decode(_))));
    }
}
