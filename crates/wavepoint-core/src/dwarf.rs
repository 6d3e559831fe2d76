//! DWARF line-table backend built on gimli and object

use crate::dbginfo::{BinaryFormat, CodeLocation, DbgInfoError, DebugInfoBackend, DebugInfoSession};
use object::{Object, ObjectSection};
use std::borrow::Cow;
use std::path::Path;
use tracing::debug;

/// Section carrying the kernel's high-level text in a two-level binary
pub const HIGH_LEVEL_SECTION: &str = ".hsatext";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRow {
    pub address: u64,
    pub line: u64,
    pub file: Option<String>,
}

/// Flattened line program of one code object
#[derive(Debug, Clone, Default)]
pub struct LineTable {
    rows: Vec<LineRow>,
    source_text: Option<String>,
}

impl LineTable {
    pub fn new(mut rows: Vec<LineRow>, source_text: Option<String>) -> Self {
        rows.sort_by_key(|r| (r.address, r.line));
        Self { rows, source_text }
    }

    pub fn rows(&self) -> &[LineRow] {
        &self.rows
    }

    fn rows_in<'a>(&'a self, file: Option<&'a str>) -> impl Iterator<Item = &'a LineRow> + 'a {
        self.rows
            .iter()
            .filter(move |row| file_matches(row.file.as_deref(), file))
    }
}

/// A missing hint matches every file. Otherwise compare whole paths, then
/// bare file names.
fn file_matches(row: Option<&str>, hint: Option<&str>) -> bool {
    match (row, hint) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(row), Some(hint)) => {
            row == hint || Path::new(row).file_name() == Path::new(hint).file_name()
        }
    }
}

fn sorted_unique(mut addrs: Vec<u64>) -> Vec<u64> {
    addrs.sort_unstable();
    addrs.dedup();
    addrs
}

impl DebugInfoSession for LineTable {
    fn nearest_mapped_line(
        &self,
        file: Option<&str>,
        line: u64,
    ) -> Result<CodeLocation, DbgInfoError> {
        self.rows_in(file)
            .filter(|row| row.line >= line)
            .min_by_key(|row| row.line)
            .map(|row| CodeLocation {
                file: row.file.clone(),
                line: row.line,
            })
            .ok_or(DbgInfoError::NotFound)
    }

    fn line_to_addresses(&self, location: &CodeLocation) -> Result<Vec<u64>, DbgInfoError> {
        let addrs = sorted_unique(
            self.rows_in(location.file.as_deref())
                .filter(|row| row.line == location.line)
                .map(|row| row.address)
                .collect(),
        );
        if addrs.is_empty() {
            Err(DbgInfoError::NotFound)
        } else {
            Ok(addrs)
        }
    }

    fn address_to_line(&self, addr: u64) -> Result<CodeLocation, DbgInfoError> {
        self.rows
            .iter()
            .take_while(|row| row.address <= addr)
            .last()
            .map(|row| CodeLocation {
                file: row.file.clone(),
                line: row.line,
            })
            .ok_or(DbgInfoError::NotFound)
    }

    fn all_mapped_addresses(&self) -> Vec<u64> {
        sorted_unique(self.rows.iter().map(|row| row.address).collect())
    }

    /// Step over: every address on another line. Step out: every address
    /// past the last one of the current line.
    fn step_addresses(&self, pc: u64, step_out: bool) -> Result<Vec<u64>, DbgInfoError> {
        let current = self.address_to_line(pc)?;
        let on_current = |row: &&LineRow| row.line == current.line && row.file == current.file;
        let addrs: Vec<u64> = if step_out {
            let last = self
                .rows
                .iter()
                .filter(on_current)
                .map(|row| row.address)
                .max()
                .unwrap_or(pc);
            self.rows
                .iter()
                .filter(|row| row.address > last)
                .map(|row| row.address)
                .collect()
        } else {
            self.rows
                .iter()
                .filter(|row| !on_current(row))
                .map(|row| row.address)
                .collect()
        };
        let addrs = sorted_unique(addrs);
        if addrs.is_empty() {
            Err(DbgInfoError::NotFound)
        } else {
            Ok(addrs)
        }
    }

    fn source_text(&self) -> Option<&str> {
        self.source_text.as_deref()
    }

    fn first_file_name(&self) -> Option<&str> {
        self.rows.iter().find_map(|row| row.file.as_deref())
    }
}

/// Opens ELF code objects and reads their DWARF line programs
#[derive(Debug, Default, Clone, Copy)]
pub struct DwarfBackend;

impl DebugInfoBackend for DwarfBackend {
    fn open(
        &self,
        image: &[u8],
        format: BinaryFormat,
    ) -> Result<Box<dyn DebugInfoSession>, DbgInfoError> {
        let file =
            object::File::parse(image).map_err(|e| DbgInfoError::Malformed(e.to_string()))?;

        let source_text = match format {
            BinaryFormat::TwoLevel => {
                let section = file
                    .section_by_name(HIGH_LEVEL_SECTION)
                    .ok_or(DbgInfoError::NoHighLevelBinary)?;
                let data = section
                    .uncompressed_data()
                    .map_err(|e| DbgInfoError::Malformed(e.to_string()))?;
                Some(String::from_utf8_lossy(&data).into_owned())
            }
            BinaryFormat::SingleLevel => None,
        };

        let rows = read_line_rows(&file).map_err(|e| DbgInfoError::Malformed(e.to_string()))?;
        if rows.is_empty() {
            return Err(DbgInfoError::NoDebugInfo);
        }
        debug!(target: "wavepoint_core::dwarf", rows = rows.len(), ?format, "Line table read");
        Ok(Box::new(LineTable::new(rows, source_text)))
    }
}

fn load_section<'data>(
    file: &object::File<'data>,
    id: gimli::SectionId,
) -> Result<Cow<'data, [u8]>, gimli::Error> {
    Ok(match file.section_by_name(id.name()) {
        Some(section) => section
            .uncompressed_data()
            .unwrap_or(Cow::Borrowed(&[][..])),
        None => Cow::Borrowed(&[][..]),
    })
}

fn read_line_rows(file: &object::File<'_>) -> Result<Vec<LineRow>, gimli::Error> {
    let endian = if file.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };

    let dwarf_cow = gimli::Dwarf::load(|id| load_section(file, id))?;
    let borrow_section: &dyn for<'a> Fn(
        &'a Cow<[u8]>,
    ) -> gimli::EndianSlice<'a, gimli::RunTimeEndian> =
        &|section| gimli::EndianSlice::new(section, endian);
    let dwarf = dwarf_cow.borrow(&borrow_section);

    let mut rows = Vec::new();
    let mut units = dwarf.units();
    while let Some(header) = units.next()? {
        let unit = dwarf.unit(header)?;
        let Some(program) = unit.line_program.clone() else {
            continue;
        };
        let mut state = program.rows();
        while let Some((header, row)) = state.next_row()? {
            if row.end_sequence() {
                continue;
            }
            let Some(line) = row.line() else {
                continue;
            };
            let file = match row.file(header) {
                Some(entry) => Some(file_path(&dwarf, &unit, header, entry)?),
                None => None,
            };
            rows.push(LineRow {
                address: row.address(),
                line: line.get(),
                file,
            });
        }
    }
    Ok(rows)
}

fn file_path<R: gimli::Reader>(
    dwarf: &gimli::Dwarf<R>,
    unit: &gimli::Unit<R>,
    header: &gimli::LineProgramHeader<R>,
    entry: &gimli::FileEntry<R>,
) -> Result<String, gimli::Error> {
    let name = dwarf.attr_string(unit, entry.path_name())?;
    let name = name.to_string_lossy()?.into_owned();
    if name.starts_with('/') {
        return Ok(name);
    }
    match entry.directory(header) {
        Some(dir) => {
            let dir = dwarf.attr_string(unit, dir)?;
            let dir = dir.to_string_lossy()?;
            if dir.is_empty() {
                Ok(name)
            } else {
                Ok(format!("{}/{}", dir, name))
            }
        }
        None => Ok(name),
    }
}
