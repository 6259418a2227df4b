//! Element slot layouts
//!
//! Two independently configured ordered element lists exist:
//! - the display order, which fixes the slot index of every element in
//!   client-facing `results` arrays so records from different sources line
//!   up column for column;
//! - the reporting order, a wider list selecting which elements are written
//!   to the reporting database and in what column order.
//!
//! Both are represented by `ElementOrder`.

use crate::sample::ElementResult;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// Default display elements, in slot order
pub const DEFAULT_DISPLAY_ELEMENTS: &[&str] = &[
    "C", "Si", "Mn", "P", "S", "Cu", "Cr", "Al", "Ti", "Sn", "Zn", "Pb",
];

/// Default reporting elements: the display set followed by the extended alloy set
pub const DEFAULT_REPORTING_ELEMENTS: &[&str] = &[
    "C", "Si", "Mn", "P", "S", "Cu", "Cr", "Al", "Ti", "Sn", "Zn", "Pb", "Ni", "Mo", "Co", "Nb",
    "V", "W", "Mg", "Bi", "Ca", "As", "Sb", "Te", "Fe",
];

/// Ordered element list with symbol -> slot lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementOrder {
    symbols: Vec<String>,
    slots: HashMap<String, usize>,
}

impl ElementOrder {
    /// Build an order from a symbol list
    ///
    /// Rejects empty symbols and duplicates; slot `i` is `symbols[i]`.
    pub fn new<I, S>(symbols: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols: Vec<String> = symbols
            .into_iter()
            .map(|s| s.into().trim().to_string())
            .collect();

        let mut slots = HashMap::with_capacity(symbols.len());
        for (idx, symbol) in symbols.iter().enumerate() {
            if symbol.is_empty() {
                return Err(Error::Config(format!(
                    "element list has an empty symbol at position {}",
                    idx
                )));
            }
            if slots.insert(symbol.clone(), idx).is_some() {
                return Err(Error::Config(format!(
                    "element '{}' listed more than once",
                    symbol
                )));
            }
        }

        Ok(Self { symbols, slots })
    }

    /// Default client-facing display order
    pub fn default_display() -> Self {
        Self::from_static(DEFAULT_DISPLAY_ELEMENTS)
    }

    /// Default reporting order
    pub fn default_reporting() -> Self {
        Self::from_static(DEFAULT_REPORTING_ELEMENTS)
    }

    fn from_static(symbols: &[&str]) -> Self {
        let symbols: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        let slots = symbols
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.clone(), idx))
            .collect();
        Self { symbols, slots }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Slot index of an element symbol
    pub fn slot(&self, symbol: &str) -> Option<usize> {
        self.slots.get(symbol).copied()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.slots.contains_key(symbol)
    }

    /// Lay out a value map into exactly `len()` slots
    ///
    /// Slot `i` is filled iff `values` holds `symbols[i]`; all other slots stay
    /// empty (not measured).
    pub fn place(&self, values: &BTreeMap<String, f64>) -> Vec<ElementResult> {
        self.symbols
            .iter()
            .map(|symbol| match values.get(symbol) {
                Some(value) => ElementResult::new(symbol.clone(), *value),
                None => ElementResult::default(),
            })
            .collect()
    }

    /// Values present in `values`, in this order's sequence
    pub fn select(&self, values: &BTreeMap<String, f64>) -> Vec<(String, f64)> {
        self.symbols
            .iter()
            .filter_map(|symbol| values.get(symbol).map(|v| (symbol.clone(), *v)))
            .collect()
    }
}

/// Element symbol from a spectrometer database result key
///
/// Keys look like `0x00000001-C` or `0x00000003-Si`; the symbol is the text
/// after the last `-`.
pub fn symbol_from_result_key(key: &str) -> Option<&str> {
    let symbol = match key.rsplit_once('-') {
        Some((_, symbol)) => symbol,
        None => key,
    }
    .trim();

    let valid = !symbol.is_empty()
        && symbol.len() <= 3
        && symbol.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && symbol.chars().skip(1).all(|c| c.is_ascii_lowercase());

    valid.then_some(symbol)
}
