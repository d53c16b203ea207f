//! Text rendering of a single display screen

use std::fmt;

/// Width of the rendered screen in characters
pub const FRAME_WIDTH: usize = 32;

/// Height of the bar chart in rows
pub const CHART_HEIGHT: usize = 8;

/// Values above this are shown in kilo-units
const KILO_THRESHOLD: f64 = 9999.0;

/// One screen worth of content
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub title: String,
    pub body: Body,
}

/// What is shown below the title
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// A single large number with its unit
    Value { text: String, unit: String },
    /// Bar heights (0 to [`CHART_HEIGHT`]) for each history bin
    Bars(Vec<usize>),
    /// Nothing worth showing yet
    NoData,
}

impl Frame {
    /// Frame showing `value`, switching to the kilo unit above 9999
    pub fn value(title: &str, value: f64, unit: &str, kilo_unit: &str) -> Self {
        let (value, unit) = if value > KILO_THRESHOLD {
            (value / 1000.0, kilo_unit)
        } else {
            (value, unit)
        };
        let text = if value.is_finite() {
            format!("{:04.2}", value)
        } else {
            "--".to_string()
        };

        Self {
            title: title.to_string(),
            body: Body::Value {
                text,
                unit: unit.to_string(),
            },
        }
    }

    /// Bar chart of `bins` scaled to the largest bin
    pub fn chart(title: &str, bins: &[f64]) -> Self {
        let max = bins
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(0.0f64, f64::max);

        let body = if max <= 0.0 {
            Body::NoData
        } else {
            Body::Bars(
                bins.iter()
                    .map(|&v| {
                        if v.is_finite() && v > 0.0 {
                            ((v / max) * CHART_HEIGHT as f64).round() as usize
                        } else {
                            0
                        }
                    })
                    .collect(),
            )
        };

        Self {
            title: title.to_string(),
            body,
        }
    }

    /// Render the frame as text lines
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![centered(&self.title)];

        match &self.body {
            Body::Value { text, unit } => {
                lines.push(String::new());
                lines.push(centered(text));
                lines.push(centered(unit));
            }
            Body::NoData => {
                lines.push(String::new());
                lines.push(centered("no data"));
            }
            Body::Bars(heights) => {
                for row in (1..=CHART_HEIGHT).rev() {
                    let line: String = heights
                        .iter()
                        .map(|&h| if h >= row { '#' } else { ' ' })
                        .collect();
                    lines.push(line.trim_end().to_string());
                }
                lines.push(hour_legend(heights.len()));
            }
        }

        lines
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

fn centered(text: &str) -> String {
    let len = text.chars().count();
    if len >= FRAME_WIDTH {
        return text.to_string();
    }
    let pad = (FRAME_WIDTH - len) / 2;
    format!("{}{}", " ".repeat(pad), text)
}

/// Hour labels every four hours, aligned to a chart `columns` wide
fn hour_legend(columns: usize) -> String {
    let mut legend = String::new();
    for hour in (0..24).step_by(4) {
        let column = hour * columns / 24;
        if !legend.is_empty() && column <= legend.len() {
            continue;
        }
        legend.push_str(&" ".repeat(column - legend.len()));
        legend.push_str(&format!("{:02}", hour));
    }
    legend
}
