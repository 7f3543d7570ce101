//! Seeded well-known names. Documents mostly consist of the same few dozen
//! tags, so these get fixed low IDs that are stable across every cache file;
//! anything else is minted into the unknown range at parse time.

use crate::intern::InternTable;

pub const EL_HTML: u16 = 1;
pub const EL_HEAD: u16 = 2;
pub const EL_TITLE: u16 = 3;
pub const EL_BODY: u16 = 4;
pub const EL_DESCRIPTION: u16 = 5;
pub const EL_TITLE_INFO: u16 = 6;
pub const EL_AUTHOR: u16 = 7;
pub const EL_SECTION: u16 = 8;
pub const EL_P: u16 = 9;
pub const EL_DIV: u16 = 10;
pub const EL_SPAN: u16 = 11;
pub const EL_UL: u16 = 12;
pub const EL_OL: u16 = 13;
pub const EL_LI: u16 = 14;
pub const EL_TABLE: u16 = 15;
pub const EL_TR: u16 = 16;
pub const EL_TD: u16 = 17;
pub const EL_TH: u16 = 18;
pub const EL_PRE: u16 = 19;
pub const EL_BR: u16 = 20;
pub const EL_HR: u16 = 21;
pub const EL_IMG: u16 = 22;
pub const EL_IMAGE: u16 = 23;
pub const EL_A: u16 = 24;
pub const EL_B: u16 = 25;
pub const EL_I: u16 = 26;
pub const EL_EM: u16 = 27;
pub const EL_STRONG: u16 = 28;
pub const EL_BLOCKQUOTE: u16 = 29;
pub const EL_CODE: u16 = 30;
pub const EL_SUB: u16 = 31;
pub const EL_SUP: u16 = 32;

pub const ATTR_ID: u16 = 1;
pub const ATTR_NAME: u16 = 2;
pub const ATTR_CLASS: u16 = 3;
pub const ATTR_STYLE: u16 = 4;
pub const ATTR_HREF: u16 = 5;
pub const ATTR_SRC: u16 = 6;
pub const ATTR_ALIGN: u16 = 7;
pub const ATTR_WIDTH: u16 = 8;
pub const ATTR_HEIGHT: u16 = 9;
pub const ATTR_TYPE: u16 = 10;
pub const ATTR_VALUE: u16 = 11;
pub const ATTR_TITLE: u16 = 12;

pub const NS_XMLNS: u16 = 1;
pub const NS_XLINK: u16 = 2;
pub const NS_L: u16 = 3;

/// Static typing of a known element, consumed by the DOM builder when it
/// decides text normalization for a freshly opened tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ElemTypeFlags {
    /// `white_space: pre`; text inside keeps every space and newline.
    pub pre: bool,
    /// Rendered as a block; whitespace-only text between such elements is
    /// noise.
    pub block: bool,
}

struct KnownElem {
    name: &'static str,
    flags: ElemTypeFlags,
}

const fn block() -> ElemTypeFlags {
    ElemTypeFlags {
        pre: false,
        block: true,
    }
}

const fn inline() -> ElemTypeFlags {
    ElemTypeFlags {
        pre: false,
        block: false,
    }
}

const fn pre_block() -> ElemTypeFlags {
    ElemTypeFlags {
        pre: true,
        block: true,
    }
}

/// Indexed by `id - 1`; order defines the `EL_*` constants above.
const KNOWN_ELEMENTS: &[KnownElem] = &[
    KnownElem { name: "html", flags: block() },
    KnownElem { name: "head", flags: block() },
    KnownElem { name: "title", flags: block() },
    KnownElem { name: "body", flags: block() },
    KnownElem { name: "description", flags: block() },
    KnownElem { name: "title-info", flags: block() },
    KnownElem { name: "author", flags: block() },
    KnownElem { name: "section", flags: block() },
    KnownElem { name: "p", flags: block() },
    KnownElem { name: "div", flags: block() },
    KnownElem { name: "span", flags: inline() },
    KnownElem { name: "ul", flags: block() },
    KnownElem { name: "ol", flags: block() },
    KnownElem { name: "li", flags: block() },
    KnownElem { name: "table", flags: block() },
    KnownElem { name: "tr", flags: block() },
    KnownElem { name: "td", flags: block() },
    KnownElem { name: "th", flags: block() },
    KnownElem { name: "pre", flags: pre_block() },
    KnownElem { name: "br", flags: inline() },
    KnownElem { name: "hr", flags: block() },
    KnownElem { name: "img", flags: inline() },
    KnownElem { name: "image", flags: block() },
    KnownElem { name: "a", flags: inline() },
    KnownElem { name: "b", flags: inline() },
    KnownElem { name: "i", flags: inline() },
    KnownElem { name: "em", flags: inline() },
    KnownElem { name: "strong", flags: inline() },
    KnownElem { name: "blockquote", flags: block() },
    KnownElem { name: "code", flags: inline() },
    KnownElem { name: "sub", flags: inline() },
    KnownElem { name: "sup", flags: inline() },
];

const KNOWN_ATTRIBUTES: &[&str] = &[
    "id", "name", "class", "style", "href", "src", "align", "width", "height", "type", "value",
    "title",
];

const KNOWN_NAMESPACES: &[&str] = &["xmlns", "xlink", "l"];

pub fn element_names() -> InternTable {
    InternTable::with_seed(
        "elements",
        KNOWN_ELEMENTS.iter().map(|e| e.name),
    )
}

pub fn attribute_names() -> InternTable {
    InternTable::with_seed("attributes", KNOWN_ATTRIBUTES.iter().copied())
}

pub fn namespace_names() -> InternTable {
    InternTable::with_seed("namespaces", KNOWN_NAMESPACES.iter().copied())
}

/// Type flags for a known element id. Unknown and out-of-range ids get the
/// inline defaults.
pub fn elem_type_flags(id: u16) -> ElemTypeFlags {
    if id == 0 {
        return ElemTypeFlags::default();
    }
    KNOWN_ELEMENTS
        .get(id as usize - 1)
        .map(|e| e.flags)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_match_seed_order() {
        let names = element_names();
        assert_eq!(names.lookup("body"), Some(EL_BODY));
        assert_eq!(names.lookup("p"), Some(EL_P));
        assert_eq!(names.lookup("pre"), Some(EL_PRE));
        assert_eq!(names.lookup("sup"), Some(EL_SUP));

        let attrs = attribute_names();
        assert_eq!(attrs.lookup("align"), Some(ATTR_ALIGN));
        assert_eq!(attrs.lookup("title"), Some(ATTR_TITLE));

        let ns = namespace_names();
        assert_eq!(ns.lookup("xlink"), Some(NS_XLINK));
    }

    #[test]
    fn type_flags() {
        assert!(elem_type_flags(EL_PRE).pre);
        assert!(elem_type_flags(EL_PRE).block);
        assert!(elem_type_flags(EL_P).block);
        assert!(!elem_type_flags(EL_SPAN).block);
        assert_eq!(elem_type_flags(0), ElemTypeFlags::default());
        assert_eq!(elem_type_flags(0x7fff), ElemTypeFlags::default());
    }
}
