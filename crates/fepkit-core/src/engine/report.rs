//! SVG diagnostics rendered with `plotters` into in-memory strings.
//!
//! Each figure is returned as SVG text so callers decide where, or whether, to write it.

use super::error::FepError;
use plotters::coord::Shift;
use plotters::prelude::*;

const HIST_BINS: usize = 20;
const CAPTION_FONT: (&str, u32) = ("sans-serif", 18);
const PANEL_FONT: (&str, u32) = ("sans-serif", 13);

/// One histogram panel of the overlap-detail grid.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkPanel {
    pub title: String,
    /// Reduced free energy of the pair, in kT.
    pub df: f64,
    pub df_err: f64,
    pub w_f: Vec<f64>,
    pub w_r: Vec<f64>,
}

fn figure_err(figure: &'static str) -> impl Fn(String) -> FepError {
    move |reason| FepError::Figure { figure, reason }
}

/// Finite `(min, max)` of `values`, widened so the range is never empty.
fn padded_range<'a>(values: impl IntoIterator<Item = &'a f64>) -> (f64, f64) {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    let span = hi - lo;
    let pad = if span > 0.0 { 0.05 * span } else { 0.5 };
    (lo - pad, hi + pad)
}

/// Density-normalised histogram over `[lo, hi)` as `(left_edge, right_edge, density)`.
fn histogram(values: &[f64], lo: f64, hi: f64, n_bins: usize) -> Vec<(f64, f64, f64)> {
    let width = (hi - lo) / n_bins as f64;
    let mut counts = vec![0usize; n_bins];
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    for v in &finite {
        let bin = (((v - lo) / width).floor() as isize).clamp(0, n_bins as isize - 1);
        counts[bin as usize] += 1;
    }
    let norm = finite.len().max(1) as f64 * width;
    counts
        .into_iter()
        .enumerate()
        .map(|(b, c)| {
            let left = lo + b as f64 * width;
            (left, left + width, c as f64 / norm)
        })
        .collect()
}

/// Draws one line per component against the pair index.
fn draw_component_lines<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    caption: &str,
    y_desc: &str,
    series: &[(String, Vec<f64>)],
    y_range: (f64, f64),
) -> Result<(), String> {
    root.fill(&WHITE).map_err(|e| e.to_string())?;
    let n_pairs = series.iter().map(|(_, ys)| ys.len()).max().unwrap_or(0);
    let x_max = (n_pairs.max(2) - 1) as f64;

    let mut chart = ChartBuilder::on(root)
        .caption(caption, CAPTION_FONT)
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..x_max, y_range.0..y_range.1)
        .map_err(|e| e.to_string())?;
    chart
        .configure_mesh()
        .x_desc("lambda window (i -> i+1)")
        .y_desc(y_desc)
        .draw()
        .map_err(|e| e.to_string())?;

    for (i, (name, ys)) in series.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        chart
            .draw_series(LineSeries::new(
                ys.iter().enumerate().map(|(x, &y)| (x as f64, y)),
                color.stroke_width(2),
            ))
            .map_err(|e| e.to_string())?
            .label(name.as_str())
            .legend(move |(x, y)| PathElement::new([(x, y), (x + 20, y)], color));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| e.to_string())?;
    root.present().map_err(|e| e.to_string())
}

/// Bootstrapped error of each pair's ΔG, one line per energy component.
pub fn make_dg_errs_figure(
    component_names: &[String],
    dg_errs_by_lambda_by_component: &[Vec<f64>],
) -> Result<String, FepError> {
    let series = by_component(component_names, dg_errs_by_lambda_by_component);
    let (_, hi) = padded_range(series.iter().flat_map(|(_, ys)| ys.iter()));
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (900, 500)).into_drawing_area();
        draw_component_lines(
            &root,
            "Standard error of dG by component",
            "dG error (kJ/mol)",
            &series,
            (0.0, hi.max(1e-3)),
        )
        .map_err(figure_err("dg_errs"))?;
    }
    Ok(svg)
}

/// Overlap of each pair per component plus the overlap of the summed works.
pub fn make_overlap_summary_figure(
    component_names: &[String],
    overlaps_by_lambda_by_component: &[Vec<f64>],
    overlaps_by_lambda: &[f64],
) -> Result<String, FepError> {
    let mut series = by_component(component_names, overlaps_by_lambda_by_component);
    series.push(("Total".to_string(), overlaps_by_lambda.to_vec()));
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (900, 500)).into_drawing_area();
        draw_component_lines(&root, "Overlap by component", "overlap", &series, (0.0, 1.05))
            .map_err(figure_err("overlap_summary"))?;
    }
    Ok(svg)
}

/// Transposes `[pair][component]` into one named series per component.
fn by_component(names: &[String], by_lambda_by_component: &[Vec<f64>]) -> Vec<(String, Vec<f64>)> {
    names
        .iter()
        .enumerate()
        .map(|(c, name)| {
            let ys = by_lambda_by_component
                .iter()
                .filter_map(|per_component| per_component.get(c).copied())
                .collect();
            (name.clone(), ys)
        })
        .collect()
}

fn draw_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    panel: &WorkPanel,
) -> Result<(), String> {
    let neg_rev: Vec<f64> = panel.w_r.iter().map(|w| -w).collect();
    let (lo, hi) = padded_range(panel.w_f.iter().chain(neg_rev.iter()));
    let fwd = histogram(&panel.w_f, lo, hi, HIST_BINS);
    let rev = histogram(&neg_rev, lo, hi, HIST_BINS);
    let y_max = fwd
        .iter()
        .chain(rev.iter())
        .map(|&(_, _, d)| d)
        .fold(0.0, f64::max)
        .max(1e-6)
        * 1.1;

    let mut chart = ChartBuilder::on(area)
        .caption(
            format!("{}, dg: {:.2} +- {:.2} kTs", panel.title, panel.df, panel.df_err),
            PANEL_FONT,
        )
        .margin(8)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(lo..hi, 0.0..y_max)
        .map_err(|e| e.to_string())?;
    chart
        .configure_mesh()
        .x_desc("work (kTs)")
        .x_labels(5)
        .y_labels(4)
        .draw()
        .map_err(|e| e.to_string())?;

    for (i, (label, bins)) in [("fwd", fwd), ("-rev", rev)].into_iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        chart
            .draw_series(bins.into_iter().map(|(left, right, density)| {
                Rectangle::new([(left, 0.0), (right, density)], color.mix(0.5).filled())
            }))
            .map_err(|e| e.to_string())?
            .label(label)
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .draw()
        .map_err(|e| e.to_string())
}

/// Grid of forward and negated-reverse work histograms: one row per adjacent pair,
/// one column per panel in that row.
pub fn make_overlap_detail_figure(panels_by_lambda: &[Vec<WorkPanel>]) -> Result<String, FepError> {
    let to_err = figure_err("overlap_detail");
    let n_rows = panels_by_lambda.len().max(1);
    let n_cols = panels_by_lambda.iter().map(Vec::len).max().unwrap_or(0).max(1);

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (n_cols as u32 * 400, n_rows as u32 * 260))
            .into_drawing_area();
        root.fill(&WHITE).map_err(|e| to_err(e.to_string()))?;
        let areas = root.split_evenly((n_rows, n_cols));
        for (row, panels) in panels_by_lambda.iter().enumerate() {
            for (col, panel) in panels.iter().enumerate() {
                draw_panel(&areas[row * n_cols + col], panel).map_err(&to_err)?;
            }
        }
        root.present().map_err(|e| to_err(e.to_string()))?;
    }
    Ok(svg)
}
