//! Legacy text encodings for archive entry names.

use encoding_rs::Encoding;
use std::collections::HashMap;

/// Named encodings offered for decoding non-UTF-8 entry names.
///
/// Names are matched case-insensitively. The table is passed to the archive
/// service explicitly; [`EncodingTable::default`] carries the full set.
#[derive(Clone, Debug)]
pub struct EncodingTable {
    encodings: HashMap<String, &'static Encoding>,
}

impl EncodingTable {
    /// An empty table.
    pub fn empty() -> Self {
        Self {
            encodings: HashMap::new(),
        }
    }

    /// Add or replace an encoding.
    pub fn with(mut self, name: &str, encoding: &'static Encoding) -> Self {
        self.encodings.insert(name.to_ascii_lowercase(), encoding);
        self
    }

    /// Look up an encoding by name.
    pub fn get(&self, name: &str) -> Option<&'static Encoding> {
        self.encodings.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.encodings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encodings.is_empty()
    }

    /// Sorted encoding names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.encodings.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for EncodingTable {
    fn default() -> Self {
        use encoding_rs::*;

        [
            ("ibm866", IBM866),
            ("iso8859_2", ISO_8859_2),
            ("iso8859_3", ISO_8859_3),
            ("iso8859_4", ISO_8859_4),
            ("iso8859_5", ISO_8859_5),
            ("iso8859_6", ISO_8859_6),
            ("iso8859_7", ISO_8859_7),
            ("iso8859_8", ISO_8859_8),
            ("iso8859_8i", ISO_8859_8_I),
            ("iso8859_10", ISO_8859_10),
            ("iso8859_13", ISO_8859_13),
            ("iso8859_14", ISO_8859_14),
            ("iso8859_15", ISO_8859_15),
            ("iso8859_16", ISO_8859_16),
            ("koi8r", KOI8_R),
            ("koi8u", KOI8_U),
            ("macintosh", MACINTOSH),
            ("windows874", WINDOWS_874),
            ("windows1250", WINDOWS_1250),
            ("windows1251", WINDOWS_1251),
            ("windows1252", WINDOWS_1252),
            ("windows1253", WINDOWS_1253),
            ("windows1254", WINDOWS_1254),
            ("windows1255", WINDOWS_1255),
            ("windows1256", WINDOWS_1256),
            ("windows1257", WINDOWS_1257),
            ("windows1258", WINDOWS_1258),
            ("macintoshcyrillic", X_MAC_CYRILLIC),
            ("gbk", GBK),
            ("gb18030", GB18030),
            ("big5", BIG5),
            ("eucjp", EUC_JP),
            ("iso2022jp", ISO_2022_JP),
            ("shiftjis", SHIFT_JIS),
            ("euckr", EUC_KR),
            ("utf16be", UTF_16BE),
            ("utf16le", UTF_16LE),
        ]
        .into_iter()
        .fold(Self::empty(), |table, (name, encoding)| {
            table.with(name, encoding)
        })
    }
}

/// Decode `raw` with `encoding`, or `None` if the bytes are malformed.
pub(crate) fn decode(encoding: &'static Encoding, raw: &[u8]) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(raw)
        .map(|s| s.into_owned())
}
