use std::fmt::{self, Write};

use super::histogram::{HistogramKind, HistogramSpec, LOG_ZERO_BUCKET};
use super::StatData;

/// Width of the widest bar in columns.
pub const HIST_WIDTH: u64 = 50;

/// Empty buckets shown on each side of data before rows are elided.
const HIST_ELISION: usize = 2;

/// Renders a stat's histogram as a text bar chart.
///
/// Returns an empty string when the spec has no histogram or no sample was
/// recorded.
pub fn render_histogram(stat: &StatData, spec: &HistogramSpec) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_histogram(&mut out, stat, spec);
    out
}

/// Writes the histogram chart of `stat` into `out`.
pub fn write_histogram<W: Write>(out: &mut W, stat: &StatData, spec: &HistogramSpec) -> fmt::Result {
    if spec.kind() == HistogramKind::None {
        return Ok(());
    }

    let counts = stat.histogram();
    let Some(first) = counts.iter().position(|&c| c > 0) else {
        return Ok(());
    };
    let last = counts.iter().rposition(|&c| c > 0).unwrap_or(first);

    // Log histograms only pad into the negative half when it holds data.
    let floor = match spec.kind() {
        HistogramKind::Log if first >= LOG_ZERO_BUCKET => LOG_ZERO_BUCKET,
        _ => 0,
    };
    let low = first.saturating_sub(HIST_ELISION).max(floor);
    let high = (last + HIST_ELISION).min(counts.len() - 1);

    let max = counts.iter().copied().max().unwrap_or(0).max(0) as u64;
    let scale = if max <= HIST_WIDTH {
        1
    } else {
        max.div_ceil(HIST_WIDTH)
    };

    let cnt_space = digits(max);
    let val_space = (low..=high)
        .map(|i| spec.bucket_label(i).to_string().len())
        .max()
        .unwrap_or(0)
        .max("value".len());

    writeln!(
        out,
        "{:>val_space$} |{} count",
        "value",
        "-".repeat(HIST_WIDTH as usize)
    )?;

    let mut eliding = false;
    for i in low..=high {
        let count = counts[i];
        if count == 0 && !has_data_near(counts, i) {
            if !eliding {
                writeln!(out, "{:>val_space$}", "~")?;
                eliding = true;
            }
            continue;
        }
        eliding = false;

        let bar = (count.max(0) as u64 / scale) as usize;
        let label = spec.bucket_label(i).to_string();
        write!(out, "{label:>val_space$} |")?;
        for _ in 0..bar {
            out.write_char('@')?;
        }
        let pad = HIST_WIDTH as usize - bar + 1;
        writeln!(out, "{:pad$}{count:>cnt_space$}", "")?;
    }

    Ok(())
}

/// Expands a stat print format.
///
/// `%C` count, `%S` sum, `%m` min, `%M` max, `%A` average, `%H` histogram,
/// `%c` cpu index and `%%` a literal percent sign. Unknown directives are
/// copied through.
pub fn format_stat(fmt: &str, stat: &StatData, spec: &HistogramSpec, cpu: Option<usize>) -> String {
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let _ = match chars.next() {
            Some('C') => write!(out, "{}", stat.count()),
            Some('S') => write!(out, "{}", stat.sum()),
            Some('m') => write!(out, "{}", stat.min()),
            Some('M') => write!(out, "{}", stat.max()),
            Some('A') => write!(out, "{}", stat.average()),
            Some('H') => write_histogram(&mut out, stat, spec),
            Some('c') => match cpu {
                Some(cpu) => write!(out, "{cpu}"),
                None => Ok(()),
            },
            Some('%') => out.write_char('%'),
            Some(other) => write!(out, "%{other}"),
            None => out.write_char('%'),
        };
    }

    out
}

fn has_data_near(counts: &[i64], idx: usize) -> bool {
    let from = idx.saturating_sub(HIST_ELISION);
    let to = (idx + HIST_ELISION).min(counts.len() - 1);
    counts[from..=to].iter().any(|&c| c > 0)
}

fn digits(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 10 {
        v /= 10;
        n += 1;
    }
    n
}
