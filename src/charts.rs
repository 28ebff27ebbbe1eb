//! Inline SVG charts for the insights page.

use std::collections::BTreeMap;
use std::f64::consts::{FRAC_PI_2, TAU};

use svg::Document;
use svg::node::element::path::Data;
use svg::node::element::{Circle, Line, Path, Rectangle, Text};

const COLORS: [&str; 6] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8", "#F7DC6F",
];
const FONT: &str = "sans-serif";

/// Keeps user-entered labels inert when the SVG is inlined into a page.
fn clean_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '&' | '"' | '\''))
        .collect()
}

fn text(x: f64, y: f64, size: f64, content: &str) -> Text {
    Text::new()
        .set("x", x)
        .set("y", y)
        .set("font-family", FONT)
        .set("font-size", size)
        .add(svg::node::Text::new(clean_label(content)))
}

fn polar(cx: f64, cy: f64, r: f64, angle: f64) -> (f64, f64) {
    (cx + r * angle.cos(), cy + r * angle.sin())
}

/// Category distribution as a pie with a legend.
pub fn pie_chart(slices: &[(String, f64)]) -> Option<String> {
    let total: f64 = slices.iter().map(|(_, value)| value.max(0.0)).sum();
    if slices.is_empty() || total <= 0.0 {
        return None;
    }

    let (width, height) = (560.0, 400.0);
    let (cx, cy, r) = (190.0, 220.0, 150.0);
    let mut document = Document::new()
        .set("viewBox", format!("0 0 {width} {height}"))
        .set("width", "100%")
        .add(
            text(width / 2.0, 32.0, 18.0, "Category-wise Spending Distribution")
                .set("text-anchor", "middle")
                .set("font-weight", "bold"),
        );

    let mut angle = -FRAC_PI_2;
    for (index, (label, value)) in slices.iter().enumerate() {
        let color = COLORS[index % COLORS.len()];
        let share = value.max(0.0) / total;

        let legend_y = 80.0 + index as f64 * 24.0;
        document = document
            .add(
                Rectangle::new()
                    .set("x", 380.0)
                    .set("y", legend_y - 12.0)
                    .set("width", 14.0)
                    .set("height", 14.0)
                    .set("fill", color),
            )
            .add(text(402.0, legend_y, 13.0, label));

        if share <= 0.0 {
            continue;
        }
        let sweep = share * TAU;
        if share >= 1.0 {
            document = document.add(
                Circle::new()
                    .set("cx", cx)
                    .set("cy", cy)
                    .set("r", r)
                    .set("fill", color)
                    .set("stroke", "white")
                    .set("stroke-width", 2.0),
            );
        } else {
            let (x0, y0) = polar(cx, cy, r, angle);
            let (x1, y1) = polar(cx, cy, r, angle + sweep);
            let large_arc = if sweep > std::f64::consts::PI { 1 } else { 0 };
            let d = format!(
                "M {cx} {cy} L {x0:.3} {y0:.3} A {r} {r} 0 {large_arc} 1 {x1:.3} {y1:.3} Z"
            );
            document = document.add(
                Path::new()
                    .set("d", d)
                    .set("fill", color)
                    .set("stroke", "white")
                    .set("stroke-width", 2.0),
            );
        }

        if share >= 0.04 {
            let (lx, ly) = polar(cx, cy, r * 0.62, angle + sweep / 2.0);
            document = document.add(
                text(lx, ly, 12.0, &format!("{:.1}%", share * 100.0))
                    .set("text-anchor", "middle")
                    .set("font-weight", "bold"),
            );
        }
        angle += sweep;
    }

    Some(document.to_string())
}

/// Month-over-month spending as a line with annotated points.
pub fn line_chart(monthly: &BTreeMap<String, f64>, currency: &str) -> Option<String> {
    if monthly.is_empty() {
        return None;
    }

    let (width, height) = (680.0, 380.0);
    let (left, right, top, bottom) = (70.0, 30.0, 60.0, 60.0);
    let plot_w = width - left - right;
    let plot_h = height - top - bottom;
    let max = monthly.values().cloned().fold(0.0, f64::max);
    let max = if max > 0.0 { max * 1.15 } else { 1.0 };

    let step = if monthly.len() > 1 {
        plot_w / (monthly.len() - 1) as f64
    } else {
        0.0
    };
    let x_at = |i: usize| {
        if monthly.len() > 1 {
            left + i as f64 * step
        } else {
            left + plot_w / 2.0
        }
    };
    let y_at = |amount: f64| top + plot_h - amount / max * plot_h;

    let mut document = Document::new()
        .set("viewBox", format!("0 0 {width} {height}"))
        .set("width", "100%")
        .add(
            text(width / 2.0, 30.0, 18.0, "Monthly Spending Trends")
                .set("text-anchor", "middle")
                .set("font-weight", "bold"),
        );

    for tick in 0..=4 {
        let amount = max * tick as f64 / 4.0;
        let y = y_at(amount);
        document = document
            .add(
                Line::new()
                    .set("x1", left)
                    .set("x2", width - right)
                    .set("y1", y)
                    .set("y2", y)
                    .set("stroke", "gray")
                    .set("stroke-opacity", 0.3)
                    .set("stroke-dasharray", "4 4"),
            )
            .add(
                text(left - 8.0, y + 4.0, 11.0, &format!("{amount:.0}"))
                    .set("text-anchor", "end"),
            );
    }
    document = document
        .add(
            Line::new()
                .set("x1", left)
                .set("x2", left)
                .set("y1", top)
                .set("y2", top + plot_h)
                .set("stroke", "black"),
        )
        .add(
            Line::new()
                .set("x1", left)
                .set("x2", width - right)
                .set("y1", top + plot_h)
                .set("y2", top + plot_h)
                .set("stroke", "black"),
        )
        .add(
            text(width / 2.0, height - 12.0, 13.0, "Month")
                .set("text-anchor", "middle")
                .set("font-weight", "bold"),
        );

    let points = monthly
        .iter()
        .enumerate()
        .map(|(i, (month, amount))| (month, *amount, x_at(i), y_at(*amount)))
        .collect::<Vec<_>>();

    let mut data = Data::new().move_to((points[0].2, points[0].3));
    for (_, _, x, y) in &points[1..] {
        data = data.line_to((*x, *y));
    }
    document = document.add(
        Path::new()
            .set("d", data)
            .set("fill", "none")
            .set("stroke", "#4ECDC4")
            .set("stroke-width", 2.5),
    );

    for (month, amount, x, y) in &points {
        document = document
            .add(
                Circle::new()
                    .set("cx", *x)
                    .set("cy", *y)
                    .set("r", 5.0)
                    .set("fill", "#FF6B6B")
                    .set("stroke", "white")
                    .set("stroke-width", 2.0),
            )
            .add(
                text(*x, y - 12.0, 11.0, &format!("{currency}{amount:.0}"))
                    .set("text-anchor", "middle")
                    .set("font-weight", "bold"),
            )
            .add(
                text(*x, top + plot_h + 20.0, 11.0, month.as_str())
                    .set("text-anchor", "middle"),
            );
    }

    Some(document.to_string())
}
