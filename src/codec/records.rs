//! Fixed layouts of the records packed into storage chunks.
//!
//! ```text
//! common_header := type:u16 | sizeDiv16:u16 | dataIndex:u32 | parentIndex:u32
//! text_record   := common_header | length:u16 | utf8_bytes[length]
//! elem_record   := common_header | id:u16 | nsid:u16 | attrCount:i16
//!                | rendMethod:u8 | _:u8 | childCount:u32 | renderData(16)
//!                | children[childCount]:u32 | attrs[attrCount]:{nsid,id,valueIdx}:u16
//! ```
//!
//! Every record occupies `sizeDiv16 * 16` bytes; trailing padding is unused.
//! All fields are little-endian. Freed records are re-typed `NO_DATA` in
//! place and skipped during iteration.

use bytes::{Buf, BufMut};

use crate::dom::node::{Attribute, RenderRect};
use crate::utils::align16;

pub const REC_NO_DATA: u16 = 0;
pub const REC_TEXT: u16 = 1;
pub const REC_ELEMENT: u16 = 2;

pub const REC_HEADER_SIZE: usize = 12;

const OFF_TYPE: usize = 0;
const OFF_SIZE_DIV16: usize = 2;
const OFF_DATA_INDEX: usize = 4;
const OFF_PARENT_INDEX: usize = 8;

const OFF_TEXT_LEN: usize = 12;
const OFF_TEXT_BYTES: usize = 14;

const OFF_ELEM_ID: usize = 12;
const OFF_ELEM_NSID: usize = 14;
const OFF_ELEM_ATTR_COUNT: usize = 16;
const OFF_ELEM_REND_METHOD: usize = 18;
const OFF_ELEM_CHILD_COUNT: usize = 20;
const OFF_ELEM_RENDER_DATA: usize = 24;
const OFF_ELEM_CHILDREN: usize = 40;

const ATTR_ENTRY_SIZE: usize = 6;

/// Encoded size of a text record holding `text_len` UTF-8 bytes.
pub fn text_record_size(text_len: usize) -> usize {
    align16(OFF_TEXT_BYTES + text_len)
}

/// Encoded size of an element record with the given child and attribute
/// counts.
pub fn elem_record_size(child_count: usize, attr_count: usize) -> usize {
    align16(OFF_ELEM_CHILDREN + child_count * 4 + attr_count * ATTR_ENTRY_SIZE)
}

fn put_header(out: &mut Vec<u8>, rec_type: u16, size: usize, data_index: u32, parent_index: u32) {
    debug_assert_eq!(size % 16, 0);
    out.put_u16_le(rec_type);
    out.put_u16_le((size / 16) as u16);
    out.put_u32_le(data_index);
    out.put_u32_le(parent_index);
}

/// Encodes a text record, padded to a 16-byte boundary.
pub fn encode_text_record(data_index: u32, parent_index: u32, text: &str) -> Vec<u8> {
    let size = text_record_size(text.len());
    let mut out = Vec::with_capacity(size);
    put_header(&mut out, REC_TEXT, size, data_index, parent_index);
    out.put_u16_le(text.len() as u16);
    out.put_slice(text.as_bytes());
    out.resize(size, 0);
    out
}

/// Encodes an element record, padded to a 16-byte boundary.
#[allow(clippy::too_many_arguments)]
pub fn encode_elem_record(
    data_index: u32,
    parent_index: u32,
    name_id: u16,
    ns_id: u16,
    rend_method: u8,
    render: &RenderRect,
    children: &[u32],
    attrs: &[Attribute],
) -> Vec<u8> {
    let size = elem_record_size(children.len(), attrs.len());
    let mut out = Vec::with_capacity(size);
    put_header(&mut out, REC_ELEMENT, size, data_index, parent_index);
    out.put_u16_le(name_id);
    out.put_u16_le(ns_id);
    out.put_i16_le(attrs.len() as i16);
    out.put_u8(rend_method);
    out.put_u8(0);
    out.put_u32_le(children.len() as u32);
    out.put_i32_le(render.x);
    out.put_i32_le(render.y);
    out.put_i32_le(render.width);
    out.put_i32_le(render.height);
    for &child in children {
        out.put_u32_le(child);
    }
    for attr in attrs {
        out.put_u16_le(attr.ns_id);
        out.put_u16_le(attr.name_id);
        out.put_u16_le(attr.value_id);
    }
    out.resize(size, 0);
    out
}

pub fn rec_type(rec: &[u8]) -> u16 {
    (&rec[OFF_TYPE..]).get_u16_le()
}

/// Total record size in bytes (`sizeDiv16 * 16`).
pub fn rec_size(rec: &[u8]) -> usize {
    (&rec[OFF_SIZE_DIV16..]).get_u16_le() as usize * 16
}

pub fn rec_data_index(rec: &[u8]) -> u32 {
    (&rec[OFF_DATA_INDEX..]).get_u32_le()
}

pub fn rec_parent_index(rec: &[u8]) -> u32 {
    (&rec[OFF_PARENT_INDEX..]).get_u32_le()
}

pub fn text_bytes(rec: &[u8]) -> &[u8] {
    let len = (&rec[OFF_TEXT_LEN..]).get_u16_le() as usize;
    &rec[OFF_TEXT_BYTES..OFF_TEXT_BYTES + len]
}

pub fn elem_name_id(rec: &[u8]) -> u16 {
    (&rec[OFF_ELEM_ID..]).get_u16_le()
}

pub fn elem_ns_id(rec: &[u8]) -> u16 {
    (&rec[OFF_ELEM_NSID..]).get_u16_le()
}

pub fn elem_attr_count(rec: &[u8]) -> usize {
    (&rec[OFF_ELEM_ATTR_COUNT..]).get_i16_le().max(0) as usize
}

pub fn elem_rend_method(rec: &[u8]) -> u8 {
    rec[OFF_ELEM_REND_METHOD]
}

pub fn elem_child_count(rec: &[u8]) -> usize {
    (&rec[OFF_ELEM_CHILD_COUNT..]).get_u32_le() as usize
}

pub fn elem_render_data(rec: &[u8]) -> RenderRect {
    let mut cursor = &rec[OFF_ELEM_RENDER_DATA..];
    RenderRect {
        x: cursor.get_i32_le(),
        y: cursor.get_i32_le(),
        width: cursor.get_i32_le(),
        height: cursor.get_i32_le(),
    }
}

pub fn elem_child(rec: &[u8], index: usize) -> u32 {
    debug_assert!(index < elem_child_count(rec));
    (&rec[OFF_ELEM_CHILDREN + index * 4..]).get_u32_le()
}

pub fn elem_children(rec: &[u8]) -> Vec<u32> {
    let count = elem_child_count(rec);
    let mut cursor = &rec[OFF_ELEM_CHILDREN..];
    (0..count).map(|_| cursor.get_u32_le()).collect()
}

fn attrs_offset(rec: &[u8]) -> usize {
    OFF_ELEM_CHILDREN + elem_child_count(rec) * 4
}

pub fn elem_attr(rec: &[u8], index: usize) -> Attribute {
    let mut cursor = &rec[attrs_offset(rec) + index * ATTR_ENTRY_SIZE..];
    Attribute {
        ns_id: cursor.get_u16_le(),
        name_id: cursor.get_u16_le(),
        value_id: cursor.get_u16_le(),
    }
}

pub fn elem_attrs(rec: &[u8]) -> Vec<Attribute> {
    (0..elem_attr_count(rec)).map(|i| elem_attr(rec, i)).collect()
}

/// Looks up an attribute value id; `ns_id` zero matches any namespace.
pub fn elem_find_attr(rec: &[u8], ns_id: u16, name_id: u16) -> Option<u16> {
    (0..elem_attr_count(rec)).find_map(|i| {
        let attr = elem_attr(rec, i);
        (attr.name_id == name_id && (ns_id == 0 || attr.ns_id == ns_id)).then_some(attr.value_id)
    })
}

pub fn set_parent_index(rec: &mut [u8], parent_index: u32) {
    (&mut rec[OFF_PARENT_INDEX..OFF_PARENT_INDEX + 4]).put_u32_le(parent_index);
}

pub fn set_rend_method(rec: &mut [u8], rend_method: u8) {
    rec[OFF_ELEM_REND_METHOD] = rend_method;
}

pub fn set_render_data(rec: &mut [u8], render: &RenderRect) {
    let mut cursor = &mut rec[OFF_ELEM_RENDER_DATA..OFF_ELEM_RENDER_DATA + 16];
    cursor.put_i32_le(render.x);
    cursor.put_i32_le(render.y);
    cursor.put_i32_le(render.width);
    cursor.put_i32_le(render.height);
}

/// Overwrites the value of an existing attribute in place. Returns false when
/// the element has no such attribute (the caller then falls back to the
/// mutable path).
pub fn set_attr_value(rec: &mut [u8], ns_id: u16, name_id: u16, value_id: u16) -> bool {
    let base = attrs_offset(rec);
    for i in 0..elem_attr_count(rec) {
        let attr = elem_attr(rec, i);
        if attr.name_id == name_id && (ns_id == 0 || attr.ns_id == ns_id) {
            let off = base + i * ATTR_ENTRY_SIZE + 4;
            (&mut rec[off..off + 2]).put_u16_le(value_id);
            return true;
        }
    }
    false
}

/// Re-types a record as a freed hole. The size field stays intact so
/// iteration keeps hopping over it.
pub fn mark_no_data(rec: &mut [u8]) {
    (&mut rec[OFF_TYPE..OFF_TYPE + 2]).put_u16_le(REC_NO_DATA);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_record_layout() {
        let rec = encode_text_record(0x120, 0x11, "Hello");
        assert_eq!(rec.len(), text_record_size(5));
        assert_eq!(rec.len() % 16, 0);
        assert_eq!(rec_type(&rec), REC_TEXT);
        assert_eq!(rec_size(&rec), rec.len());
        assert_eq!(rec_data_index(&rec), 0x120);
        assert_eq!(rec_parent_index(&rec), 0x11);
        assert_eq!(text_bytes(&rec), b"Hello");
    }

    #[test]
    fn elem_record_layout() {
        let render = RenderRect {
            x: 1,
            y: 2,
            width: 300,
            height: 40,
        };
        let children = [0x30, 0x52, 0x71];
        let attrs = [
            Attribute {
                ns_id: 0,
                name_id: 4,
                value_id: 9,
            },
            Attribute {
                ns_id: 2,
                name_id: 5,
                value_id: 1,
            },
        ];
        let rec = encode_elem_record(0x21, 0x11, 7, 3, 2, &render, &children, &attrs);

        assert_eq!(rec.len(), elem_record_size(3, 2));
        assert_eq!(rec_type(&rec), REC_ELEMENT);
        assert_eq!(elem_name_id(&rec), 7);
        assert_eq!(elem_ns_id(&rec), 3);
        assert_eq!(elem_rend_method(&rec), 2);
        assert_eq!(elem_child_count(&rec), 3);
        assert_eq!(elem_children(&rec), vec![0x30, 0x52, 0x71]);
        assert_eq!(elem_child(&rec, 1), 0x52);
        assert_eq!(elem_attr_count(&rec), 2);
        assert_eq!(elem_attr(&rec, 1).value_id, 1);
        assert_eq!(elem_render_data(&rec), render);
        assert_eq!(elem_find_attr(&rec, 0, 5), Some(1));
        assert_eq!(elem_find_attr(&rec, 1, 5), None);
        assert_eq!(elem_find_attr(&rec, 0, 99), None);
    }

    #[test]
    fn size_invariant_holds() {
        for (children, attrs) in [(0, 0), (1, 0), (0, 1), (5, 3), (100, 20)] {
            let payload = 40 + children * 4 + attrs * 6;
            let size = elem_record_size(children, attrs);
            assert!(size >= payload);
            assert_eq!(size % 16, 0);
            assert!(size - payload < 16);
        }
    }

    #[test]
    fn in_place_overwrites() {
        let mut rec = encode_elem_record(
            0x21,
            0x11,
            7,
            0,
            1,
            &RenderRect::default(),
            &[0x30],
            &[Attribute {
                ns_id: 0,
                name_id: 4,
                value_id: 9,
            }],
        );

        set_parent_index(&mut rec, 0x41);
        assert_eq!(rec_parent_index(&rec), 0x41);

        set_rend_method(&mut rec, 3);
        assert_eq!(elem_rend_method(&rec), 3);

        let render = RenderRect {
            x: -4,
            y: 8,
            width: 15,
            height: 16,
        };
        set_render_data(&mut rec, &render);
        assert_eq!(elem_render_data(&rec), render);

        assert!(set_attr_value(&mut rec, 0, 4, 77));
        assert_eq!(elem_find_attr(&rec, 0, 4), Some(77));
        assert!(!set_attr_value(&mut rec, 0, 99, 1));

        mark_no_data(&mut rec);
        assert_eq!(rec_type(&rec), REC_NO_DATA);
        assert_eq!(rec_size(&rec), rec.len());
    }
}
