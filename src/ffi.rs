use crate::error::{WatermarkError, status};
use std::ffi::{CStr, c_char};

/// C entry point for [`crate::add_watermark`].
///
/// Returns a status code; null or non-UTF-8 arguments yield
/// [`status::INVALID_ENCODING`].
///
/// # Safety
///
/// Every non-null pointer must reference a NUL-terminated string that stays
/// valid for the duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilemark_add_watermark(
    input_path: *const c_char,
    output_path: *const c_char,
    font_path: *const c_char,
    author_name: *const c_char,
    date: *const c_char,
) -> i32 {
    let args = unsafe {
        (
            arg(input_path),
            arg(output_path),
            arg(font_path),
            arg(author_name),
            arg(date),
        )
    };
    match args {
        (Ok(input), Ok(output), Ok(font), Ok(author), Ok(date)) => {
            crate::add_watermark(input, output, font, author, date)
        }
        _ => status::INVALID_ENCODING,
    }
}

unsafe fn arg<'a>(ptr: *const c_char) -> Result<&'a str, WatermarkError> {
    if ptr.is_null() {
        return Err(WatermarkError::Encoding("null argument".to_string()));
    }
    Ok(unsafe { CStr::from_ptr(ptr) }.to_str()?)
}
