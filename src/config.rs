/*
    TrackFlux

    Copyright 2026

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! Runtime type-table overrides (`IMG.CFG`-equivalent, spec §6 "Configuration").
//!
//! The hosting firmware parses its own `IMG.CFG` file and hands the matcher an additional
//! table of rows "in the same shape as the built-ins"; that parsing step is out of scope here
//! (§1 names `IMG.CFG` parsing as an external collaborator), but the override table it produces
//! is not — [`dispatch::open_with_overrides`] consults it ahead of the host's compiled table.
//! [`CustomTable`] borrows its rows rather than owning them, so a caller can build them once in
//! the bump-pointer [`crate::arena::Arena`] and reuse them for the lifetime of a mount.

use crate::type_table::{match_table, MatchResult, RawEntry};

/// A caller-supplied type table, in [`RawEntry`] row shape, consulted before a host's compiled
/// table. An empty override table is equivalent to not supplying one at all.
pub struct CustomTable<'a> {
    entries: &'a [RawEntry],
}

impl<'a> CustomTable<'a> {
    pub fn new(entries: &'a [RawEntry]) -> Self {
        CustomTable { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &'a [RawEntry] {
        self.entries
    }

    /// Walk this table the same way [`crate::type_table::table_for_host`]'s result is walked.
    pub fn match_against(&self, base_off: u64, f_size: u64) -> Option<MatchResult> {
        match_table(self.entries, base_off, f_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_override_table_matches_nothing() {
        let table = CustomTable::new(&[]);
        assert!(table.is_empty());
        assert!(table.match_against(0, 1474560).is_none());
    }

    #[test]
    fn override_table_takes_a_row_matching_an_unusual_size() {
        let rows = [RawEntry::new(5, 1, true, 40, 1, 2, 1, false, 0, false, false)];
        let table = CustomTable::new(&rows);
        let result = table.match_against(0, 40 * 5 * 512).unwrap();
        assert_eq!(result.entry.nr_secs(), 5);
        assert_eq!(result.nr_cyls, 40);
    }
}
