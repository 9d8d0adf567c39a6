use std::fmt::{self, Write};

use crate::map::{BoundedString, Map, MapValue};
use crate::stat::{format_stat, HistogramSpec, StatData};

/// Stat line printed for every stat entry, followed by its histogram.
const STAT_FORMAT: &str = "count=%C sum=%S min=%m max=%M avg=%A\n%H";

/// Text form of a stored value.
pub trait RenderValue: MapValue {
    fn render<W: Write>(&self, params: &Self::Params, out: &mut W) -> fmt::Result;
}

impl RenderValue for i64 {
    fn render<W: Write>(&self, _: &(), out: &mut W) -> fmt::Result {
        writeln!(out, "{self}")
    }
}

impl RenderValue for BoundedString {
    fn render<W: Write>(&self, _: &usize, out: &mut W) -> fmt::Result {
        writeln!(out, "\"{self}\"")
    }
}

impl RenderValue for StatData {
    fn render<W: Write>(&self, spec: &HistogramSpec, out: &mut W) -> fmt::Result {
        out.write_str(&format_stat(STAT_FORMAT, self, spec, None))
    }
}

/// Prints `name[key] = value` for entries in active-list order.
///
/// `limit` caps the number of entries printed.
pub fn write_map<V: RenderValue, W: Write>(
    out: &mut W,
    name: &str,
    map: &Map<V>,
    limit: Option<usize>,
) -> fmt::Result {
    for (key, value) in map.iter().take(limit.unwrap_or(usize::MAX)) {
        write!(out, "{name}[{key}] = ")?;
        value.render(map.params(), out)?;
    }
    Ok(())
}

pub fn render_map<V: RenderValue>(name: &str, map: &Map<V>, limit: Option<usize>) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_map(&mut out, name, map, limit);
    out
}
