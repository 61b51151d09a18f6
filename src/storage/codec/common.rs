use crate::error::{GraniteError, GraniteResult};
use crate::storage::codec::DecodedData;

pub struct CommonCodec;

impl CommonCodec {
    pub fn encode_bool(data: bool) -> Vec<u8> {
        vec![data as u8]
    }

    pub fn decode_bool(bytes: &[u8]) -> GraniteResult<DecodedData<bool>> {
        let (byte, offset) = Self::decode_u8(bytes)?;
        Ok((byte != 0, offset))
    }

    pub fn encode_u8(data: u8) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u8(bytes: &[u8]) -> GraniteResult<DecodedData<u8>> {
        Self::check_len(bytes, 1)?;
        Ok((bytes[0], 1))
    }

    pub fn encode_u32(data: u32) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u32(bytes: &[u8]) -> GraniteResult<DecodedData<u32>> {
        Self::check_len(bytes, 4)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&bytes[..4]);
        Ok((u32::from_be_bytes(buf), 4))
    }

    pub fn encode_i32(data: i32) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_i32(bytes: &[u8]) -> GraniteResult<DecodedData<i32>> {
        Self::check_len(bytes, 4)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&bytes[..4]);
        Ok((i32::from_be_bytes(buf), 4))
    }

    pub fn encode_u64(data: u64) -> Vec<u8> {
        data.to_be_bytes().to_vec()
    }

    pub fn decode_u64(bytes: &[u8]) -> GraniteResult<DecodedData<u64>> {
        Self::check_len(bytes, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        Ok((u64::from_be_bytes(buf), 8))
    }

    /// Length-prefixed byte string.
    pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
        let mut bytes = Self::encode_u32(data.len() as u32);
        bytes.extend_from_slice(data);
        bytes
    }

    pub fn decode_bytes(bytes: &[u8]) -> GraniteResult<DecodedData<Vec<u8>>> {
        let (len, offset) = Self::decode_u32(bytes)?;
        let len = len as usize;
        Self::check_len(bytes, offset + len)?;
        Ok((bytes[offset..offset + len].to_vec(), offset + len))
    }

    fn check_len(bytes: &[u8], needed: usize) -> GraniteResult<()> {
        if bytes.len() < needed {
            return Err(GraniteError::Internal(format!(
                "bytes length {} is less than {}",
                bytes.len(),
                needed
            )));
        }
        Ok(())
    }
}
