#![allow(unsafe_op_in_unsafe_fn)]

use crate::{Color, WatermarkError, WatermarkSpec, Watermarker};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList, PyModule};

#[pyfunction]
fn add_watermark(
    py: Python<'_>,
    input: &str,
    output: &str,
    font: &str,
    author: &str,
    date: &str,
) -> i32 {
    py.allow_threads(|| crate::add_watermark(input, output, font, author, date))
}

#[pyfunction]
#[pyo3(signature = (
    input,
    output,
    font,
    text,
    font_size=26.0,
    opacity=0.1,
    angle=60.0,
    color=None,
    parallel=true,
    debug_log=None,
))]
#[allow(clippy::too_many_arguments)]
fn watermark(
    py: Python<'_>,
    input: &str,
    output: &str,
    font: &str,
    text: &str,
    font_size: f32,
    opacity: f32,
    angle: f32,
    color: Option<(f32, f32, f32)>,
    parallel: bool,
    debug_log: Option<String>,
) -> PyResult<PyObject> {
    let mut spec = WatermarkSpec::text(text)
        .with_font_size(font_size)
        .with_opacity(opacity)
        .with_angle(angle);
    if let Some((r, g, b)) = color {
        spec = spec.with_color(Color::rgb(r, g, b));
    }
    let mut builder = Watermarker::builder().parallel(parallel);
    if let Some(path) = debug_log {
        builder = builder.debug_log(path);
    }
    let marker = builder.build().map_err(to_py_err)?;
    let report = py
        .allow_threads(|| marker.watermark(input, output, font, &spec))
        .map_err(to_py_err)?;

    let d = PyDict::new_bound(py);
    d.set_item("ok", true)?;
    d.set_item("pages", report.page_count())?;
    d.set_item("tiles", report.total_tiles())?;
    d.set_item("source_font_bytes", report.source_font_bytes)?;
    d.set_item("subset_font_bytes", report.subset_font_bytes)?;
    d.set_item("retained_glyphs", report.retained_glyphs)?;
    d.set_item("advance_width", report.advance_width)?;
    d.set_item("total_ms", report.total_ms)?;
    let pages = PyList::empty_bound(py);
    for page in &report.pages {
        let p = PyDict::new_bound(py);
        p.set_item("page", page.page_number)?;
        p.set_item("tiles", page.tile_count)?;
        p.set_item("content_bytes", page.content_bytes)?;
        p.set_item("render_ms", page.render_ms)?;
        pages.append(p)?;
    }
    d.set_item("page_metrics", pages)?;
    Ok(d.to_object(py))
}

#[pymodule]
fn _tilemark(_py: Python<'_>, module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_function(wrap_pyfunction!(add_watermark, module)?)?;
    module.add_function(wrap_pyfunction!(watermark, module)?)?;
    module.add("STATUS_OK", crate::status::OK)?;
    Ok(())
}

fn to_py_err(err: WatermarkError) -> PyErr {
    PyValueError::new_err(format!("[status {}] {}", err.status_code(), err))
}
