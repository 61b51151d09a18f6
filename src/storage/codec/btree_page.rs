use crate::buffer::PAGE_SIZE;
use crate::error::{GraniteError, GraniteResult};
use crate::storage::codec::{CommonCodec, DecodedData};
use crate::storage::page::{
    BPlusTreeHeaderPage, BPlusTreeInternalPage, BPlusTreeInternalPageHeader, BPlusTreeLeafPage,
    BPlusTreeLeafPageHeader, BPlusTreePage, BPlusTreePageType, RecordId,
};

fn pad_to_page(mut bytes: Vec<u8>) -> Vec<u8> {
    debug_assert!(bytes.len() <= PAGE_SIZE, "page image overflows page size");
    bytes.resize(PAGE_SIZE, 0);
    bytes
}

pub struct BPlusTreePageTypeCodec;

impl BPlusTreePageTypeCodec {
    const LEAF_TAG: u8 = 1;
    const INTERNAL_TAG: u8 = 2;

    pub fn encode(page_type: BPlusTreePageType) -> Vec<u8> {
        match page_type {
            BPlusTreePageType::LeafPage => CommonCodec::encode_u8(Self::LEAF_TAG),
            BPlusTreePageType::InternalPage => CommonCodec::encode_u8(Self::INTERNAL_TAG),
        }
    }

    pub fn decode(bytes: &[u8]) -> GraniteResult<DecodedData<BPlusTreePageType>> {
        let (tag, offset) = CommonCodec::decode_u8(bytes)?;
        match tag {
            Self::LEAF_TAG => Ok((BPlusTreePageType::LeafPage, offset)),
            Self::INTERNAL_TAG => Ok((BPlusTreePageType::InternalPage, offset)),
            other => Err(GraniteError::Internal(format!(
                "unknown tree page tag {}",
                other
            ))),
        }
    }
}

pub struct BPlusTreeHeaderPageCodec;

impl BPlusTreeHeaderPageCodec {
    pub fn encode(page: &BPlusTreeHeaderPage) -> Vec<u8> {
        pad_to_page(CommonCodec::encode_i32(page.root_page_id))
    }

    pub fn decode(bytes: &[u8]) -> GraniteResult<DecodedData<BPlusTreeHeaderPage>> {
        let (root_page_id, offset) = CommonCodec::decode_i32(bytes)?;
        Ok((BPlusTreeHeaderPage { root_page_id }, offset))
    }
}

pub struct BPlusTreeInternalPageCodec;

impl BPlusTreeInternalPageCodec {
    pub fn encode(page: &BPlusTreeInternalPage) -> Vec<u8> {
        let mut bytes = BPlusTreePageTypeCodec::encode(page.header.page_type);
        bytes.extend(CommonCodec::encode_u32(page.header.current_size));
        bytes.extend(CommonCodec::encode_u32(page.header.max_size));
        for (key, child) in &page.array {
            bytes.extend(CommonCodec::encode_bytes(key));
            bytes.extend(CommonCodec::encode_i32(*child));
        }
        pad_to_page(bytes)
    }

    pub fn decode(bytes: &[u8]) -> GraniteResult<DecodedData<BPlusTreeInternalPage>> {
        let mut offset = 0;
        let (page_type, n) = BPlusTreePageTypeCodec::decode(&bytes[offset..])?;
        offset += n;
        if page_type != BPlusTreePageType::InternalPage {
            return Err(GraniteError::Internal(
                "expected an internal page".to_string(),
            ));
        }
        let (current_size, n) = CommonCodec::decode_u32(&bytes[offset..])?;
        offset += n;
        let (max_size, n) = CommonCodec::decode_u32(&bytes[offset..])?;
        offset += n;

        let mut array = Vec::with_capacity(current_size as usize);
        for _ in 0..current_size {
            let (key, n) = CommonCodec::decode_bytes(&bytes[offset..])?;
            offset += n;
            let (child, n) = CommonCodec::decode_i32(&bytes[offset..])?;
            offset += n;
            array.push((key, child));
        }

        Ok((
            BPlusTreeInternalPage {
                header: BPlusTreeInternalPageHeader {
                    page_type,
                    current_size,
                    max_size,
                },
                array,
            },
            offset,
        ))
    }
}

pub struct BPlusTreeLeafPageCodec;

impl BPlusTreeLeafPageCodec {
    pub fn encode(page: &BPlusTreeLeafPage) -> Vec<u8> {
        let mut bytes = BPlusTreePageTypeCodec::encode(page.header.page_type);
        bytes.extend(CommonCodec::encode_u32(page.header.current_size));
        bytes.extend(CommonCodec::encode_u32(page.header.max_size));
        bytes.extend(CommonCodec::encode_i32(page.header.next_page_id));
        for (key, rid) in &page.array {
            bytes.extend(CommonCodec::encode_bytes(key));
            bytes.extend(CommonCodec::encode_i32(rid.page_id));
            bytes.extend(CommonCodec::encode_u32(rid.slot_num));
        }
        pad_to_page(bytes)
    }

    pub fn decode(bytes: &[u8]) -> GraniteResult<DecodedData<BPlusTreeLeafPage>> {
        let mut offset = 0;
        let (page_type, n) = BPlusTreePageTypeCodec::decode(&bytes[offset..])?;
        offset += n;
        if page_type != BPlusTreePageType::LeafPage {
            return Err(GraniteError::Internal("expected a leaf page".to_string()));
        }
        let (current_size, n) = CommonCodec::decode_u32(&bytes[offset..])?;
        offset += n;
        let (max_size, n) = CommonCodec::decode_u32(&bytes[offset..])?;
        offset += n;
        let (next_page_id, n) = CommonCodec::decode_i32(&bytes[offset..])?;
        offset += n;

        let mut array = Vec::with_capacity(current_size as usize);
        for _ in 0..current_size {
            let (key, n) = CommonCodec::decode_bytes(&bytes[offset..])?;
            offset += n;
            let (rid_page_id, n) = CommonCodec::decode_i32(&bytes[offset..])?;
            offset += n;
            let (rid_slot, n) = CommonCodec::decode_u32(&bytes[offset..])?;
            offset += n;
            array.push((key, RecordId::new(rid_page_id, rid_slot)));
        }

        Ok((
            BPlusTreeLeafPage {
                header: BPlusTreeLeafPageHeader {
                    page_type,
                    current_size,
                    max_size,
                    next_page_id,
                },
                array,
            },
            offset,
        ))
    }
}

pub struct BPlusTreePageCodec;

impl BPlusTreePageCodec {
    pub fn encode(page: &BPlusTreePage) -> Vec<u8> {
        match page {
            BPlusTreePage::Internal(internal) => BPlusTreeInternalPageCodec::encode(internal),
            BPlusTreePage::Leaf(leaf) => BPlusTreeLeafPageCodec::encode(leaf),
        }
    }

    pub fn decode(bytes: &[u8]) -> GraniteResult<DecodedData<BPlusTreePage>> {
        let (page_type, _) = BPlusTreePageTypeCodec::decode(bytes)?;
        match page_type {
            BPlusTreePageType::InternalPage => {
                let (page, offset) = BPlusTreeInternalPageCodec::decode(bytes)?;
                Ok((BPlusTreePage::Internal(page), offset))
            }
            BPlusTreePageType::LeafPage => {
                let (page, offset) = BPlusTreeLeafPageCodec::decode(bytes)?;
                Ok((BPlusTreePage::Leaf(page), offset))
            }
        }
    }
}
