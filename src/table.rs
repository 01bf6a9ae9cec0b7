//! Wide and long tables, and the reshaping between them.
//!
//! A [`WideTable`] has one row per id tuple and one column per measurement
//! variable. [`WideTable::melt`] turns it into a [`LongTable`] of
//! `(ids..., variable, value)` rows and [`LongTable::pivot`] reverses it.

use serde::Serialize;
use std::collections::HashMap;

use crate::error::TableError;
use crate::model::Side;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WideRow {
    pub ids: Vec<String>,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WideTable {
    pub id_columns: Vec<String>,
    pub value_columns: Vec<String>,
    pub rows: Vec<WideRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongRow {
    pub ids: Vec<String>,
    pub variable: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LongTable {
    pub id_columns: Vec<String>,
    pub rows: Vec<LongRow>,
}

impl WideTable {
    pub fn new<I, V>(id_columns: I, value_columns: V) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        Self {
            id_columns: id_columns.into_iter().map(Into::into).collect(),
            value_columns: value_columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(
        &mut self,
        ids: Vec<String>,
        values: Vec<Option<f64>>,
    ) -> Result<(), TableError> {
        let row = self.rows.len();
        if ids.len() != self.id_columns.len() {
            return Err(TableError::RaggedRow {
                row,
                expected: self.id_columns.len(),
                found: ids.len(),
            });
        }
        if values.len() != self.value_columns.len() {
            return Err(TableError::RaggedRow {
                row,
                expected: self.value_columns.len(),
                found: values.len(),
            });
        }
        self.rows.push(WideRow { ids, values });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Copy of the table with `columns` prepended to the id columns, every
    /// row taking the matching entry of `values`.
    pub fn with_leading_ids(
        &self,
        columns: &[&str],
        values: &[String],
    ) -> Result<WideTable, TableError> {
        if columns.len() != values.len() {
            return Err(TableError::RaggedRow {
                row: 0,
                expected: columns.len(),
                found: values.len(),
            });
        }
        let id_columns = columns
            .iter()
            .map(|c| c.to_string())
            .chain(self.id_columns.iter().cloned());
        let mut out = WideTable::new(id_columns, self.value_columns.iter().cloned());
        for row in &self.rows {
            let ids = values.iter().chain(&row.ids).cloned().collect();
            out.push_row(ids, row.values.clone())?;
        }
        Ok(out)
    }

    /// Stacks tables vertically. Value columns are the union of all inputs in
    /// first-seen order; cells a table does not have are `None`.
    pub fn concat(tables: &[WideTable]) -> Result<WideTable, TableError> {
        let Some(first) = tables.first() else {
            return Ok(WideTable::default());
        };

        let mut value_columns: Vec<String> = Vec::new();
        for table in tables {
            if let Some(col) = table.id_columns.iter().find(|c| !first.id_columns.contains(c)) {
                return Err(TableError::UnknownColumn(col.clone()));
            }
            for col in &table.value_columns {
                if !value_columns.contains(col) {
                    value_columns.push(col.clone());
                }
            }
        }

        let mut out = WideTable::new(first.id_columns.clone(), value_columns.clone());
        for table in tables {
            let id_order: Vec<usize> = first
                .id_columns
                .iter()
                .map(|c| {
                    table
                        .id_columns
                        .iter()
                        .position(|t| t == c)
                        .ok_or_else(|| TableError::UnknownColumn(c.clone()))
                })
                .collect::<Result<_, _>>()?;

            for row in &table.rows {
                let ids = id_order.iter().map(|&i| row.ids[i].clone()).collect();
                let values = value_columns
                    .iter()
                    .map(|col| {
                        table
                            .value_columns
                            .iter()
                            .position(|c| c == col)
                            .and_then(|i| row.values[i])
                    })
                    .collect();
                out.push_row(ids, values)?;
            }
        }
        Ok(out)
    }

    /// Melts every value column into long rows keeping only `id_columns`.
    ///
    /// Output is variable-major: all rows for the first value column in
    /// input row order, then the second column, and so on.
    pub fn melt(&self, id_columns: &[&str]) -> Result<LongTable, TableError> {
        let positions: Vec<usize> = id_columns
            .iter()
            .map(|c| {
                self.id_columns
                    .iter()
                    .position(|own| own == c)
                    .ok_or_else(|| TableError::UnknownColumn(c.to_string()))
            })
            .collect::<Result<_, _>>()?;

        let mut rows = Vec::with_capacity(self.rows.len() * self.value_columns.len());
        for (col, variable) in self.value_columns.iter().enumerate() {
            for row in &self.rows {
                rows.push(LongRow {
                    ids: positions.iter().map(|&p| row.ids[p].clone()).collect(),
                    variable: variable.clone(),
                    value: row.values[col],
                });
            }
        }

        Ok(LongTable {
            id_columns: id_columns.iter().map(|c| c.to_string()).collect(),
            rows,
        })
    }
}

impl LongTable {
    /// Spreads `variable` back into columns. Row and column order follow
    /// first appearance, so `wide.melt(all_ids)?.pivot()? == wide`.
    pub fn pivot(&self) -> Result<WideTable, TableError> {
        let mut row_index: HashMap<&[String], usize> = HashMap::new();
        let mut row_ids: Vec<&[String]> = Vec::new();
        let mut col_index: HashMap<&str, usize> = HashMap::new();
        let mut columns: Vec<&str> = Vec::new();

        for row in &self.rows {
            if !row_index.contains_key(row.ids.as_slice()) {
                row_index.insert(row.ids.as_slice(), row_ids.len());
                row_ids.push(row.ids.as_slice());
            }
            if !col_index.contains_key(row.variable.as_str()) {
                col_index.insert(row.variable.as_str(), columns.len());
                columns.push(row.variable.as_str());
            }
        }

        let mut cells: Vec<Vec<Option<Option<f64>>>> =
            vec![vec![None; columns.len()]; row_ids.len()];
        for row in &self.rows {
            let r = row_index[row.ids.as_slice()];
            let c = col_index[row.variable.as_str()];
            if cells[r][c].is_some() {
                return Err(TableError::DuplicateCell {
                    ids: row.ids.clone(),
                    variable: row.variable.clone(),
                });
            }
            cells[r][c] = Some(row.value);
        }

        let mut wide = WideTable::new(self.id_columns.clone(), columns.iter().copied());
        for (ids, values) in row_ids.into_iter().zip(cells) {
            wide.push_row(ids.to_vec(), values.into_iter().map(Option::flatten).collect())?;
        }
        Ok(wide)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Semantic parts of a measurement variable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableParts {
    pub unit: Option<String>,
    pub side: Option<Side>,
    pub level: Option<u8>,
}

/// Splits a variable name on `_` into unit, side and level.
///
/// `spl_L1` → (`spl`, L, 1), `target_L2` → (`target`, L, 2), `end_3` →
/// (`end`, -, 3), `left` → (-, L, -), `R2` → (-, R, 2). A trailing part that
/// is not a side/level tag leaves the whole name as the unit.
pub fn decompose_variable(name: &str) -> Result<VariableParts, TableError> {
    let parts: Vec<&str> = name.split('_').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(TableError::BadVariableName(name.to_string()));
    }

    let (head, tag) = parts.split_at(parts.len() - 1);
    match parse_tag(tag[0]) {
        Some((side, level)) => Ok(VariableParts {
            unit: (!head.is_empty()).then(|| head.join("_")),
            side,
            level,
        }),
        None => Ok(VariableParts {
            unit: Some(name.to_string()),
            side: None,
            level: None,
        }),
    }
}

fn parse_tag(tag: &str) -> Option<(Option<Side>, Option<u8>)> {
    match tag.to_ascii_lowercase().as_str() {
        "left" => return Some((Some(Side::Left), None)),
        "right" => return Some((Some(Side::Right), None)),
        _ => {}
    }

    let mut chars = tag.chars();
    let first = chars.next()?;
    let (side, digits) = match first {
        'L' | 'l' => (Some(Side::Left), chars.as_str()),
        'R' | 'r' => (Some(Side::Right), chars.as_str()),
        _ => (None, tag),
    };

    if digits.is_empty() {
        return side.map(|s| (Some(s), None));
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u8>().ok().map(|level| (side, Some(level)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_wide() -> WideTable {
        let mut wide = WideTable::new(["filename", "freq"], ["spl_L1", "spl_R1", "spl_L2"]);
        wide.push_row(
            vec!["S01_BestFit".into(), "500".into()],
            vec![Some(60.0), Some(61.5), None],
        )
        .unwrap();
        wide.push_row(
            vec!["S01_BestFit".into(), "1000".into()],
            vec![Some(62.0), Some(63.0), Some(70.0)],
        )
        .unwrap();
        wide
    }

    #[test]
    fn test_melt_pivot_round_trip() {
        let wide = sample_wide();
        let long = wide.melt(&["filename", "freq"]).unwrap();
        assert_eq!(long.len(), 6);
        assert_eq!(long.pivot().unwrap(), wide);
    }

    #[test]
    fn test_melt_is_variable_major_and_row_ordered() {
        let long = sample_wide().melt(&["freq"]).unwrap();
        let order: Vec<(&str, &str)> = long
            .rows
            .iter()
            .map(|r| (r.variable.as_str(), r.ids[0].as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("spl_L1", "500"),
                ("spl_L1", "1000"),
                ("spl_R1", "500"),
                ("spl_R1", "1000"),
                ("spl_L2", "500"),
                ("spl_L2", "1000"),
            ]
        );
    }

    #[test]
    fn test_melt_unknown_id_column() {
        let result = sample_wide().melt(&["subject"]);
        assert_eq!(result, Err(TableError::UnknownColumn("subject".into())));
    }

    #[test]
    fn test_pivot_rejects_duplicate_cells() {
        let long = sample_wide().melt(&["filename"]).unwrap();
        assert!(matches!(long.pivot(), Err(TableError::DuplicateCell { .. })));
    }

    #[test]
    fn test_ragged_row_rejected() {
        let mut wide = WideTable::new(["freq"], ["a", "b"]);
        let result = wide.push_row(vec!["500".into()], vec![Some(1.0)]);
        assert!(matches!(result, Err(TableError::RaggedRow { .. })));
    }

    #[test]
    fn test_concat_unions_columns() {
        let mut a = WideTable::new(["freq"], ["spl_L1"]);
        a.push_row(vec!["500".into()], vec![Some(1.0)]).unwrap();
        let mut b = WideTable::new(["freq"], ["spl_R1"]);
        b.push_row(vec!["500".into()], vec![Some(2.0)]).unwrap();

        let all = WideTable::concat(&[a, b]).unwrap();
        assert_eq!(all.value_columns, vec!["spl_L1", "spl_R1"]);
        assert_eq!(all.rows[0].values, vec![Some(1.0), None]);
        assert_eq!(all.rows[1].values, vec![None, Some(2.0)]);
    }

    #[test]
    fn test_leading_ids_then_concat() {
        let mut a = WideTable::new(["freq"], ["spl_L2", "spl_R2"]);
        a.push_row(vec!["500".into()], vec![Some(70.0), Some(60.0)]).unwrap();
        let mut b = WideTable::new(["freq"], ["spl_L2"]);
        b.push_row(vec!["500".into()], vec![Some(66.0)]).unwrap();

        let tagged: Vec<WideTable> = [("S01", &a), ("S02", &b)]
            .iter()
            .map(|(subject, t)| t.with_leading_ids(&["subject"], &[subject.to_string()]).unwrap())
            .collect();
        let all = WideTable::concat(&tagged).unwrap();

        assert_eq!(all.id_columns, vec!["subject", "freq"]);
        assert_eq!(all.rows[1].ids, vec!["S02".to_string(), "500".into()]);
        assert_eq!(all.rows[1].values, vec![Some(66.0), None]);
    }

    #[test]
    fn test_decompose_variable_forms() {
        let spl = decompose_variable("spl_L1").unwrap();
        assert_eq!(spl.unit.as_deref(), Some("spl"));
        assert_eq!(spl.side, Some(Side::Left));
        assert_eq!(spl.level, Some(1));

        let target = decompose_variable("target_R2").unwrap();
        assert_eq!(target.unit.as_deref(), Some("target"));
        assert_eq!(target.side, Some(Side::Right));

        let end = decompose_variable("end_3").unwrap();
        assert_eq!((end.unit.as_deref(), end.side, end.level), (Some("end"), None, Some(3)));

        let left = decompose_variable("left").unwrap();
        assert_eq!((left.unit, left.side, left.level), (None, Some(Side::Left), None));

        let bare = decompose_variable("R2").unwrap();
        assert_eq!((bare.unit, bare.side, bare.level), (None, Some(Side::Right), Some(2)));
    }

    #[test]
    fn test_decompose_without_tag_keeps_name_as_unit() {
        let parts = decompose_variable("real_ear").unwrap();
        assert_eq!(parts.unit.as_deref(), Some("real_ear"));
        assert_eq!(parts.side, None);
    }

    #[test]
    fn test_decompose_rejects_empty_parts() {
        assert!(decompose_variable("spl_").is_err());
        assert!(decompose_variable("").is_err());
    }
}
