//! Result storage and rendering.

use std::fmt;

/// An ordered collection of `(name, value)` pairs produced by one read of
/// a counter group: the requested counters in request order, followed by
/// derived metrics in the order they were computed.
///
/// All renderings are pure functions of the stored entries; nothing here
/// re-reads counters.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CounterResult {
    entries: Vec<(String, f64)>,
}

impl CounterResult {
    /// Looks up a counter or metric value by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, value)| *value)
    }

    /// Iterates over the entries in stored order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the result holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the result as CSV, one row per entry.
    ///
    /// `extra_column` is a caller-supplied tag identifying the measurement
    /// run (for example which code variant was measured) and becomes the
    /// third column of every row. With `print_header` a
    /// `counter,value,type` header row comes first.
    pub fn to_csv(&self, delimiter: char, print_header: bool, extra_column: &str) -> String {
        let mut rows = Vec::with_capacity(self.entries.len() + 1);
        if print_header {
            rows.push(format!("counter{delimiter}value{delimiter}type"));
        }
        for (name, value) in &self.entries {
            let value = format_value(*value);
            rows.push(format!("{name}{delimiter}{value}{delimiter}{extra_column}"));
        }
        rows.join("\n")
    }

    /// Renders the result as a flat JSON object mapping name to value.
    pub fn to_json(&self) -> String {
        let fields: Vec<String> = self
            .entries
            .iter()
            .map(|(name, value)| format!("\"{}\": {}", name, format_value(*value)))
            .collect();
        format!("{{{}}}", fields.join(", "))
    }
}

impl From<Vec<(String, f64)>> for CounterResult {
    fn from(entries: Vec<(String, f64)>) -> Self {
        Self { entries }
    }
}

impl fmt::Display for CounterResult {
    /// Renders the result as an aligned two-column table.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self
            .entries
            .iter()
            .map(|(_, value)| format_value(*value))
            .collect();
        let width = values.iter().map(String::len).max().unwrap_or(5).max(5);

        writeln!(f, "| {:>width$} | counter", "value")?;
        writeln!(f, "|-{:->width$}-|{:-<8}", "", "")?;
        for ((name, _), value) in self.entries.iter().zip(&values) {
            writeln!(f, "| {value:>width$} | {name}")?;
        }
        Ok(())
    }
}

/// Counter values are integral unless multiplexing correction or a derived
/// metric made them fractional; render whole numbers without a decimal
/// point.
fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value:.6}")
    }
}
