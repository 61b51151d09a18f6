use crate::buffer::PAGE_SIZE;
use crate::error::GraniteResult;
use crate::storage::codec::{CommonCodec, DecodedData};
use crate::storage::page::{TablePage, TablePageHeader, TupleMeta};

pub struct TablePageCodec;

impl TablePageCodec {
    pub fn encode(page: &TablePage) -> Vec<u8> {
        let mut bytes = CommonCodec::encode_i32(page.header.next_page_id);
        bytes.extend(CommonCodec::encode_u32(page.header.num_tuples));
        for (meta, data) in &page.tuples {
            bytes.extend(CommonCodec::encode_bool(meta.is_deleted));
            bytes.extend(CommonCodec::encode_bytes(data));
        }
        debug_assert!(bytes.len() <= PAGE_SIZE);
        bytes.resize(PAGE_SIZE, 0);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> GraniteResult<DecodedData<TablePage>> {
        let mut offset = 0;
        let (next_page_id, n) = CommonCodec::decode_i32(&bytes[offset..])?;
        offset += n;
        let (num_tuples, n) = CommonCodec::decode_u32(&bytes[offset..])?;
        offset += n;

        let mut tuples = Vec::with_capacity(num_tuples as usize);
        for _ in 0..num_tuples {
            let (is_deleted, n) = CommonCodec::decode_bool(&bytes[offset..])?;
            offset += n;
            let (data, n) = CommonCodec::decode_bytes(&bytes[offset..])?;
            offset += n;
            tuples.push((TupleMeta { is_deleted }, data));
        }

        Ok((
            TablePage {
                header: TablePageHeader {
                    next_page_id,
                    num_tuples,
                },
                tuples,
            },
            offset,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::EMPTY_TUPLE_META;

    #[test]
    fn table_page_round_trip() {
        let mut page = TablePage::new();
        page.header.next_page_id = 5;
        page.insert_tuple(EMPTY_TUPLE_META, b"first").unwrap();
        page.insert_tuple(TupleMeta { is_deleted: true }, b"second").unwrap();

        let encoded = TablePageCodec::encode(&page);
        assert_eq!(encoded.len(), PAGE_SIZE);
        let (decoded, _) = TablePageCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, page);
    }
}
