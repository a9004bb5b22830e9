//! Tab separated, column aligned text tables.
use std::io::{self, Write};

const TAB_WIDTH: usize = 8;

/// Collects rows of cells and writes them with every column padded by tabs
/// to a common tab stop.
///
/// The last cell of a row is never padded, so it does not widen its column.
/// Every other cell is followed by at least one tab.
#[derive(Debug, Clone, Default)]
pub struct TabTable {
    min_width: usize,
    padding: usize,
    rows: Vec<Vec<String>>,
}

impl TabTable {
    /// `min_width` is the smallest width of a column, `padding` the number of
    /// columns added to the widest cell (at least one).
    pub fn new(min_width: usize, padding: usize) -> Self {
        Self {
            min_width,
            padding,
            rows: vec![],
        }
    }

    pub fn push_row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(cells.into_iter().map(Into::into).collect());
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = vec![];
        for row in &self.rows {
            let padded = row.len().saturating_sub(1);
            for (i, cell) in row[..padded].iter().enumerate() {
                let width = (cell.chars().count() + self.padding.max(1)).max(self.min_width);
                match widths.get_mut(i) {
                    Some(w) => *w = (*w).max(width),
                    None => widths.push(width),
                }
            }
        }
        widths
            .into_iter()
            .map(|w| w.div_ceil(TAB_WIDTH) * TAB_WIDTH)
            .collect()
    }

    pub fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        let widths = self.column_widths();
        for row in &self.rows {
            let last = row.len().saturating_sub(1);
            for (i, cell) in row.iter().enumerate() {
                w.write_all(cell.as_bytes())?;
                if i < last {
                    let gap = widths[i] - cell.chars().count();
                    let tabs = gap.div_ceil(TAB_WIDTH);
                    w.write_all(&b"\t".repeat(tabs))?;
                }
            }
            w.write_all(b"\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn render(table: &TabTable) -> String {
        let mut out = vec![];
        table.write_to(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn aligns_columns_to_tab_stops() {
        let mut table = TabTable::new(0, 1);
        table.push_row(["Database", "Retention", "Size"]);
        table.push_row(["db", "autogen_rp", "12"]);

        // "Database" plus padding rounds up to 16, as does "autogen_rp"
        assert_eq!(
            render(&table),
            "Database\tRetention\tSize\ndb\t\tautogen_rp\t12\n"
        );
    }

    #[test]
    fn minimum_width_and_full_cells() {
        let mut table = TabTable::new(16, 0);
        table.push_row(["# Shard", "x"]);
        table.push_row(["exactly_16_chars", "y"]);

        // a cell filling the minimum width pushes the column to the next stop
        assert_eq!(render(&table), "# Shard\t\t\tx\nexactly_16_chars\ty\n");
    }

    #[test]
    fn last_cell_is_not_padded() {
        let mut table = TabTable::new(0, 1);
        table.push_row(["a", "a very long trailing cell"]);
        table.push_row(["b"]);
        assert!(!table.is_empty());
        assert_eq!(render(&table), "a\ta very long trailing cell\nb\n");
    }
}
