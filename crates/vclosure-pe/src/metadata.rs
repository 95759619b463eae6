//! ECMA-335 metadata root and `#~` table stream.

use std::collections::BTreeSet;

use crate::{PeError, RawAssembly, RawAssemblyRef};

pub(crate) const TABLE_MODULE: u8 = 0x00;
pub(crate) const TABLE_MODULE_REF: u8 = 0x1a;
pub(crate) const TABLE_IMPL_MAP: u8 = 0x1c;
pub(crate) const TABLE_ASSEMBLY: u8 = 0x20;
pub(crate) const TABLE_ASSEMBLY_REF: u8 = 0x23;

const TABLE_TYPE_REF: u8 = 0x01;
const TABLE_TYPE_DEF: u8 = 0x02;
const TABLE_FIELD: u8 = 0x04;
const TABLE_METHOD_DEF: u8 = 0x06;
const TABLE_PARAM: u8 = 0x08;
const TABLE_INTERFACE_IMPL: u8 = 0x09;
const TABLE_MEMBER_REF: u8 = 0x0a;
const TABLE_CONSTANT: u8 = 0x0b;
const TABLE_CUSTOM_ATTRIBUTE: u8 = 0x0c;
const TABLE_FIELD_MARSHAL: u8 = 0x0d;
const TABLE_DECL_SECURITY: u8 = 0x0e;
const TABLE_CLASS_LAYOUT: u8 = 0x0f;
const TABLE_FIELD_LAYOUT: u8 = 0x10;
const TABLE_STAND_ALONE_SIG: u8 = 0x11;
const TABLE_EVENT_MAP: u8 = 0x12;
const TABLE_EVENT: u8 = 0x14;
const TABLE_PROPERTY_MAP: u8 = 0x15;
const TABLE_PROPERTY: u8 = 0x17;
const TABLE_METHOD_SEMANTICS: u8 = 0x18;
const TABLE_METHOD_IMPL: u8 = 0x19;
const TABLE_TYPE_SPEC: u8 = 0x1b;
const TABLE_FIELD_RVA: u8 = 0x1d;
const TABLE_ASSEMBLY_PROCESSOR: u8 = 0x21;
const TABLE_ASSEMBLY_OS: u8 = 0x22;
const TABLE_ASSEMBLY_REF_PROCESSOR: u8 = 0x24;
const TABLE_ASSEMBLY_REF_OS: u8 = 0x25;
const TABLE_FILE: u8 = 0x26;
const TABLE_EXPORTED_TYPE: u8 = 0x27;
const TABLE_MANIFEST_RESOURCE: u8 = 0x28;
const TABLE_NESTED_CLASS: u8 = 0x29;
const TABLE_GENERIC_PARAM: u8 = 0x2a;
const TABLE_METHOD_SPEC: u8 = 0x2b;
const TABLE_GENERIC_PARAM_CONSTRAINT: u8 = 0x2c;

const KNOWN_TABLES: &[u8] = &[
    TABLE_MODULE,
    TABLE_TYPE_REF,
    TABLE_TYPE_DEF,
    TABLE_FIELD,
    TABLE_METHOD_DEF,
    TABLE_PARAM,
    TABLE_INTERFACE_IMPL,
    TABLE_MEMBER_REF,
    TABLE_CONSTANT,
    TABLE_CUSTOM_ATTRIBUTE,
    TABLE_FIELD_MARSHAL,
    TABLE_DECL_SECURITY,
    TABLE_CLASS_LAYOUT,
    TABLE_FIELD_LAYOUT,
    TABLE_STAND_ALONE_SIG,
    TABLE_EVENT_MAP,
    TABLE_EVENT,
    TABLE_PROPERTY_MAP,
    TABLE_PROPERTY,
    TABLE_METHOD_SEMANTICS,
    TABLE_METHOD_IMPL,
    TABLE_MODULE_REF,
    TABLE_TYPE_SPEC,
    TABLE_IMPL_MAP,
    TABLE_FIELD_RVA,
    TABLE_ASSEMBLY,
    TABLE_ASSEMBLY_PROCESSOR,
    TABLE_ASSEMBLY_OS,
    TABLE_ASSEMBLY_REF,
    TABLE_ASSEMBLY_REF_PROCESSOR,
    TABLE_ASSEMBLY_REF_OS,
    TABLE_FILE,
    TABLE_EXPORTED_TYPE,
    TABLE_MANIFEST_RESOURCE,
    TABLE_NESTED_CLASS,
    TABLE_GENERIC_PARAM,
    TABLE_METHOD_SPEC,
    TABLE_GENERIC_PARAM_CONSTRAINT,
];

// Coded index groups, ECMA-335 II.24.2.6: member tables and tag width.
const TYPE_DEF_OR_REF: (&[u8], u32) = (&[TABLE_TYPE_DEF, TABLE_TYPE_REF, TABLE_TYPE_SPEC], 2);
const HAS_CONSTANT: (&[u8], u32) = (&[TABLE_FIELD, TABLE_PARAM, TABLE_PROPERTY], 2);
const HAS_CUSTOM_ATTRIBUTE: (&[u8], u32) = (
    &[
        TABLE_METHOD_DEF,
        TABLE_FIELD,
        TABLE_TYPE_REF,
        TABLE_TYPE_DEF,
        TABLE_PARAM,
        TABLE_INTERFACE_IMPL,
        TABLE_MEMBER_REF,
        TABLE_MODULE,
        TABLE_DECL_SECURITY,
        TABLE_PROPERTY,
        TABLE_EVENT,
        TABLE_STAND_ALONE_SIG,
        TABLE_MODULE_REF,
        TABLE_TYPE_SPEC,
        TABLE_ASSEMBLY,
        TABLE_ASSEMBLY_REF,
        TABLE_FILE,
        TABLE_EXPORTED_TYPE,
        TABLE_MANIFEST_RESOURCE,
        TABLE_GENERIC_PARAM,
        TABLE_GENERIC_PARAM_CONSTRAINT,
        TABLE_METHOD_SPEC,
    ],
    5,
);
const HAS_FIELD_MARSHAL: (&[u8], u32) = (&[TABLE_FIELD, TABLE_PARAM], 1);
const HAS_DECL_SECURITY: (&[u8], u32) = (&[TABLE_TYPE_DEF, TABLE_METHOD_DEF, TABLE_ASSEMBLY], 2);
const MEMBER_REF_PARENT: (&[u8], u32) = (
    &[
        TABLE_TYPE_DEF,
        TABLE_TYPE_REF,
        TABLE_MODULE_REF,
        TABLE_METHOD_DEF,
        TABLE_TYPE_SPEC,
    ],
    3,
);
const HAS_SEMANTICS: (&[u8], u32) = (&[TABLE_EVENT, TABLE_PROPERTY], 1);
const METHOD_DEF_OR_REF: (&[u8], u32) = (&[TABLE_METHOD_DEF, TABLE_MEMBER_REF], 1);
const MEMBER_FORWARDED: (&[u8], u32) = (&[TABLE_FIELD, TABLE_METHOD_DEF], 1);
const IMPLEMENTATION: (&[u8], u32) = (&[TABLE_FILE, TABLE_ASSEMBLY_REF, TABLE_EXPORTED_TYPE], 2);
const CUSTOM_ATTRIBUTE_TYPE: (&[u8], u32) = (&[TABLE_METHOD_DEF, TABLE_MEMBER_REF], 3);
const RESOLUTION_SCOPE: (&[u8], u32) = (
    &[
        TABLE_MODULE,
        TABLE_MODULE_REF,
        TABLE_ASSEMBLY_REF,
        TABLE_TYPE_REF,
    ],
    2,
);
const TYPE_OR_METHOD_DEF: (&[u8], u32) = (&[TABLE_TYPE_DEF, TABLE_METHOD_DEF], 1);

pub(crate) fn read_metadata(md: &[u8]) -> Result<TableReader<'_>, PeError> {
    let mut cur = Cursor::new(md);
    if cur.u32()? != 0x424a_5342 {
        return Err(crate::malformed("bad metadata signature"));
    }
    cur.skip(4)?; // major/minor version
    cur.skip(4)?; // reserved
    let version_len = cur.u32()? as usize;
    cur.skip(version_len)?;
    cur.skip(2)?; // flags
    let stream_count = cur.u16()? as usize;

    let mut tables: Option<&[u8]> = None;
    let mut strings: Option<&[u8]> = None;
    for _ in 0..stream_count {
        let offset = cur.u32()? as usize;
        let size = cur.u32()? as usize;
        let name = cur.stream_name()?;
        let data = md
            .get(offset..offset.saturating_add(size))
            .ok_or_else(|| crate::malformed(&format!("stream {name:?} out of range")))?;
        match name.as_str() {
            "#~" => tables = Some(data),
            "#-" => return Err(crate::malformed("uncompressed #- metadata stream")),
            "#Strings" => strings = Some(data),
            _ => {}
        }
    }

    TableReader::new(
        tables.ok_or_else(|| crate::malformed("missing #~ stream"))?,
        strings.ok_or_else(|| crate::malformed("missing #Strings stream"))?,
    )
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Sizes {
    rows: [u32; 64],
    string_idx: usize,
    guid_idx: usize,
    blob_idx: usize,
}

impl Sizes {
    pub(crate) fn new(rows: [u32; 64], heap_sizes: u8) -> Sizes {
        Sizes {
            rows,
            string_idx: if heap_sizes & 0x01 != 0 { 4 } else { 2 },
            guid_idx: if heap_sizes & 0x02 != 0 { 4 } else { 2 },
            blob_idx: if heap_sizes & 0x04 != 0 { 4 } else { 2 },
        }
    }

    fn idx(&self, table: u8) -> usize {
        if self.rows[table as usize] < 0x1_0000 {
            2
        } else {
            4
        }
    }

    fn coded(&self, group: (&[u8], u32)) -> usize {
        let (tables, tag_bits) = group;
        let limit = 1u32 << (16 - tag_bits);
        if tables.iter().any(|&t| self.rows[t as usize] >= limit) {
            4
        } else {
            2
        }
    }

    pub(crate) fn row_size(&self, table: u8) -> usize {
        let s = self.string_idx;
        let g = self.guid_idx;
        let b = self.blob_idx;
        match table {
            TABLE_MODULE => 2 + s + 3 * g,
            TABLE_TYPE_REF => self.coded(RESOLUTION_SCOPE) + 2 * s,
            TABLE_TYPE_DEF => {
                4 + 2 * s
                    + self.coded(TYPE_DEF_OR_REF)
                    + self.idx(TABLE_FIELD)
                    + self.idx(TABLE_METHOD_DEF)
            }
            TABLE_FIELD => 2 + s + b,
            TABLE_METHOD_DEF => 8 + s + b + self.idx(TABLE_PARAM),
            TABLE_PARAM => 4 + s,
            TABLE_INTERFACE_IMPL => self.idx(TABLE_TYPE_DEF) + self.coded(TYPE_DEF_OR_REF),
            TABLE_MEMBER_REF => self.coded(MEMBER_REF_PARENT) + s + b,
            TABLE_CONSTANT => 2 + self.coded(HAS_CONSTANT) + b,
            TABLE_CUSTOM_ATTRIBUTE => {
                self.coded(HAS_CUSTOM_ATTRIBUTE) + self.coded(CUSTOM_ATTRIBUTE_TYPE) + b
            }
            TABLE_FIELD_MARSHAL => self.coded(HAS_FIELD_MARSHAL) + b,
            TABLE_DECL_SECURITY => 2 + self.coded(HAS_DECL_SECURITY) + b,
            TABLE_CLASS_LAYOUT => 6 + self.idx(TABLE_TYPE_DEF),
            TABLE_FIELD_LAYOUT => 4 + self.idx(TABLE_FIELD),
            TABLE_STAND_ALONE_SIG => b,
            TABLE_EVENT_MAP => self.idx(TABLE_TYPE_DEF) + self.idx(TABLE_EVENT),
            TABLE_EVENT => 2 + s + self.coded(TYPE_DEF_OR_REF),
            TABLE_PROPERTY_MAP => self.idx(TABLE_TYPE_DEF) + self.idx(TABLE_PROPERTY),
            TABLE_PROPERTY => 2 + s + b,
            TABLE_METHOD_SEMANTICS => 2 + self.idx(TABLE_METHOD_DEF) + self.coded(HAS_SEMANTICS),
            TABLE_METHOD_IMPL => self.idx(TABLE_TYPE_DEF) + 2 * self.coded(METHOD_DEF_OR_REF),
            TABLE_MODULE_REF => s,
            TABLE_TYPE_SPEC => b,
            TABLE_IMPL_MAP => 2 + self.coded(MEMBER_FORWARDED) + s + self.idx(TABLE_MODULE_REF),
            TABLE_FIELD_RVA => 4 + self.idx(TABLE_FIELD),
            TABLE_ASSEMBLY => 16 + b + 2 * s,
            TABLE_ASSEMBLY_PROCESSOR => 4,
            TABLE_ASSEMBLY_OS => 12,
            TABLE_ASSEMBLY_REF => 12 + 2 * b + 2 * s,
            TABLE_ASSEMBLY_REF_PROCESSOR => 4 + self.idx(TABLE_ASSEMBLY_REF),
            TABLE_ASSEMBLY_REF_OS => 12 + self.idx(TABLE_ASSEMBLY_REF),
            TABLE_FILE => 4 + s + b,
            TABLE_EXPORTED_TYPE => 8 + 2 * s + self.coded(IMPLEMENTATION),
            TABLE_MANIFEST_RESOURCE => 8 + s + self.coded(IMPLEMENTATION),
            TABLE_NESTED_CLASS => 2 * self.idx(TABLE_TYPE_DEF),
            TABLE_GENERIC_PARAM => 4 + self.coded(TYPE_OR_METHOD_DEF) + s,
            TABLE_METHOD_SPEC => self.coded(METHOD_DEF_OR_REF) + b,
            TABLE_GENERIC_PARAM_CONSTRAINT => {
                self.idx(TABLE_GENERIC_PARAM) + self.coded(TYPE_DEF_OR_REF)
            }
            _ => 0,
        }
    }
}

pub(crate) struct TableReader<'a> {
    strings: &'a [u8],
    tables: &'a [u8],
    sizes: Sizes,
    offsets: [usize; 64],
}

impl<'a> TableReader<'a> {
    fn new(stream: &'a [u8], strings: &'a [u8]) -> Result<TableReader<'a>, PeError> {
        let mut cur = Cursor::new(stream);
        cur.skip(4)?; // reserved
        cur.skip(2)?; // schema version
        let heap_sizes = cur.u8()?;
        cur.skip(1)?; // reserved
        let valid = cur.u64()?;
        cur.skip(8)?; // sorted

        let mut rows = [0u32; 64];
        for bit in 0..64u8 {
            if valid & (1u64 << bit) == 0 {
                continue;
            }
            if !KNOWN_TABLES.contains(&bit) {
                return Err(crate::malformed(&format!(
                    "unsupported metadata table {bit:#04x}"
                )));
            }
            rows[bit as usize] = cur.u32()?;
        }
        if heap_sizes & 0x40 != 0 {
            cur.skip(4)?;
        }

        let sizes = Sizes::new(rows, heap_sizes);
        let mut offsets = [0usize; 64];
        let mut total = 0usize;
        for table in 0..64u8 {
            offsets[table as usize] = total;
            total += rows[table as usize] as usize * sizes.row_size(table);
        }
        let tables = &stream[cur.pos..];
        if tables.len() < total {
            return Err(crate::malformed("truncated table rows"));
        }

        Ok(TableReader {
            strings,
            tables,
            sizes,
            offsets,
        })
    }

    pub(crate) fn rows(&self, table: u8) -> u32 {
        self.sizes.rows[table as usize]
    }

    fn row_cursor(&self, table: u8, index: u32) -> Cursor<'a> {
        let size = self.sizes.row_size(table);
        let off = self.offsets[table as usize] + index as usize * size;
        Cursor::new(&self.tables[off..off + size])
    }

    fn read_string(&self, idx: u32) -> Result<String, PeError> {
        let start = idx as usize;
        let heap = self
            .strings
            .get(start..)
            .ok_or_else(|| crate::malformed("string index out of range"))?;
        let end = heap
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| crate::malformed("unterminated heap string"))?;
        String::from_utf8(heap[..end].to_vec())
            .map_err(|_| crate::malformed("heap string is not utf-8"))
    }

    fn str_idx(&self, cur: &mut Cursor<'_>) -> Result<u32, PeError> {
        cur.read_idx(self.sizes.string_idx)
    }

    /// The Assembly row plus every AssemblyRef row. A managed image with no
    /// Assembly row (a netmodule) is not an assembly.
    pub(crate) fn assembly(&self) -> Result<RawAssembly, PeError> {
        if self.rows(TABLE_ASSEMBLY) == 0 {
            return Err(PeError::NotManagedImage);
        }
        let mut cur = self.row_cursor(TABLE_ASSEMBLY, 0);
        cur.skip(4)?; // hash algorithm
        let version = [cur.u16()?, cur.u16()?, cur.u16()?, cur.u16()?];
        cur.skip(4)?; // flags
        cur.skip(self.sizes.blob_idx)?; // public key
        let name_idx = self.str_idx(&mut cur)?;
        let name = self.read_string(name_idx)?;

        let mut references = Vec::new();
        for i in 0..self.rows(TABLE_ASSEMBLY_REF) {
            let mut cur = self.row_cursor(TABLE_ASSEMBLY_REF, i);
            let version = [cur.u16()?, cur.u16()?, cur.u16()?, cur.u16()?];
            cur.skip(4)?; // flags
            cur.skip(self.sizes.blob_idx)?; // public key or token
            let name_idx = self.str_idx(&mut cur)?;
            references.push(RawAssemblyRef {
                name: self.read_string(name_idx)?,
                version,
            });
        }
        Ok(RawAssembly {
            name,
            version,
            references,
        })
    }

    /// Distinct ModuleRef names reachable from ImplMap rows, sorted.
    pub(crate) fn import_modules(&self) -> Result<Vec<String>, PeError> {
        let mut modules = BTreeSet::new();
        let forwarded = self.sizes.coded(MEMBER_FORWARDED);
        let scope_idx = self.sizes.idx(TABLE_MODULE_REF);
        for i in 0..self.rows(TABLE_IMPL_MAP) {
            let mut cur = self.row_cursor(TABLE_IMPL_MAP, i);
            cur.skip(2)?; // mapping flags
            cur.skip(forwarded)?;
            cur.skip(self.sizes.string_idx)?; // imported entry point name
            let scope = cur.read_idx(scope_idx)?;
            if scope == 0 || scope > self.rows(TABLE_MODULE_REF) {
                return Err(crate::malformed("ImplMap import scope out of range"));
            }
            let mut module = self.row_cursor(TABLE_MODULE_REF, scope - 1);
            let name_idx = self.str_idx(&mut module)?;
            modules.insert(self.read_string(name_idx)?);
        }
        Ok(modules.into_iter().collect())
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Cursor<'a> {
        Cursor { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PeError> {
        let slice = self
            .buf
            .get(self.pos..self.pos.saturating_add(n))
            .ok_or_else(|| crate::malformed("truncated metadata"))?;
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), PeError> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8, PeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, PeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, PeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, PeError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_idx(&mut self, size: usize) -> Result<u32, PeError> {
        match size {
            2 => Ok(self.u16()? as u32),
            _ => self.u32(),
        }
    }

    /// Stream names are NUL-terminated ASCII padded to a 4-byte boundary.
    fn stream_name(&mut self) -> Result<String, PeError> {
        let start = self.pos;
        loop {
            if self.u8()? == 0 {
                break;
            }
            if self.pos - start > 32 {
                return Err(crate::malformed("unterminated stream name"));
            }
        }
        let name = &self.buf[start..self.pos - 1];
        let consumed = self.pos - start;
        self.skip((4 - consumed % 4) % 4)?;
        String::from_utf8(name.to_vec()).map_err(|_| crate::malformed("stream name is not utf-8"))
    }
}
