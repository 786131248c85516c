use crate::error::WatermarkError;
use fixed::types::I32F32;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Pt(I32F32);

impl Pt {
    pub const ZERO: Pt = Pt(I32F32::from_bits(0));

    pub fn from_f32(value: f32) -> Pt {
        if !value.is_finite() {
            return Pt::ZERO;
        }
        let milli = (value as f64 * 1000.0).round();
        let milli = milli.clamp(i64::MIN as f64, i64::MAX as f64) as i64;
        Pt::from_milli_i64(milli)
    }

    pub fn to_f32(self) -> f32 {
        self.0.to_num()
    }

    pub fn to_milli_i64(self) -> i64 {
        let bits = self.0.to_bits() as i128;
        let denom = 1i128 << 32;
        let scaled = bits * 1000;
        let adj = if scaled >= 0 { denom / 2 } else { -denom / 2 };
        let milli = (scaled + adj) / denom;
        milli.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn max(self, other: Pt) -> Pt {
        if self >= other { self } else { other }
    }

    pub fn quantize(value: f32) -> f32 {
        Pt::from_f32(value).to_f32()
    }

    pub fn mul_ratio(self, num: i64, denom: i64) -> Pt {
        if denom == 0 {
            return Pt::ZERO;
        }
        let milli = self.to_milli_i64() as i128;
        let value = div_round_i128(milli.saturating_mul(num as i128), denom as i128);
        Pt::from_milli_i128(value)
    }

    pub fn from_milli_i64(milli: i64) -> Pt {
        Pt::from_milli_i128(milli as i128)
    }

    fn from_milli_i128(milli: i128) -> Pt {
        let denom = 1i128 << 32;
        let adj = if milli >= 0 { 500 } else { -500 };
        let bits = (milli * denom + adj) / 1000;
        let bits = bits.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        Pt(I32F32::from_bits(bits))
    }
}

impl std::ops::Add for Pt {
    type Output = Pt;
    fn add(self, rhs: Pt) -> Pt {
        Pt::from_milli_i128(self.to_milli_i64() as i128 + rhs.to_milli_i64() as i128)
    }
}

fn div_round_i128(num: i128, den: i128) -> i128 {
    if den == 0 {
        return 0;
    }
    let den_abs = den.abs();
    if num >= 0 {
        (num + (den_abs / 2)) / den
    } else {
        -(((-num) + (den_abs / 2)) / den)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn gray(level: f32) -> Self {
        Self::rgb(level, level, level)
    }

    fn clamped(self) -> Option<Self> {
        let parts = [self.r, self.g, self.b];
        if parts.iter().any(|v| v.is_nan()) {
            return None;
        }
        Some(Self {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width: Pt,
    pub height: Pt,
    pub origin_x: f32,
    pub origin_y: f32,
    pub rotation: i32,
}

impl PageGeometry {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width: Pt::from_f32(width),
            height: Pt::from_f32(height),
            origin_x: 0.0,
            origin_y: 0.0,
            rotation: 0,
        }
    }

    pub fn letter() -> Self {
        // 8.5in x 11in at 72pt/in.
        Self::new(612.0, 792.0)
    }

    pub fn with_origin(mut self, x: f32, y: f32) -> Self {
        self.origin_x = x;
        self.origin_y = y;
        self
    }

    pub fn with_rotation(mut self, degrees: i32) -> Self {
        self.rotation = degrees.rem_euclid(360) / 90 * 90;
        self
    }

    pub fn larger_side(&self) -> f32 {
        self.width.max(self.height).to_f32()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkSpec {
    pub text: String,
    pub font_size: f32,
    pub opacity: f32,
    pub angle_degrees: f32,
    pub color: Color,
}

impl WatermarkSpec {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            font_size: 26.0,
            opacity: 0.1,
            angle_degrees: 60.0,
            color: Color::gray(0.1),
        }
    }

    pub fn for_author(name: &str, date: &str) -> Self {
        Self::text(format!("author:{name}, date:{date} internal review"))
    }

    pub fn with_font_size(mut self, size: f32) -> Self {
        self.font_size = size;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_angle(mut self, degrees: f32) -> Self {
        self.angle_degrees = degrees;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn normalized(&self) -> Result<WatermarkSpec, WatermarkError> {
        if self.text.is_empty() {
            return Err(WatermarkError::InvalidWatermarkSpec(
                "watermark text is empty".to_string(),
            ));
        }
        if !self.font_size.is_finite() || self.font_size <= 0.0 {
            return Err(WatermarkError::InvalidWatermarkSpec(format!(
                "font size must be positive, got {}",
                self.font_size
            )));
        }
        if self.opacity.is_nan() {
            return Err(WatermarkError::InvalidWatermarkSpec(
                "opacity is not a number".to_string(),
            ));
        }
        if !self.angle_degrees.is_finite() {
            return Err(WatermarkError::InvalidWatermarkSpec(format!(
                "angle must be finite, got {}",
                self.angle_degrees
            )));
        }
        let color = self.color.clamped().ok_or_else(|| {
            WatermarkError::InvalidWatermarkSpec("color component is not a number".to_string())
        })?;
        Ok(WatermarkSpec {
            text: self.text.clone(),
            font_size: self.font_size,
            opacity: self.opacity.clamp(0.0, 1.0),
            angle_degrees: self.angle_degrees,
            color,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pt_round_trips_milli_precision() {
        let v = Pt::from_f32(12.345);
        assert_eq!(v.to_milli_i64(), 12_345);
        assert_eq!(Pt::from_f32(f32::NAN), Pt::ZERO);
        assert_eq!(Pt::from_f32(10.0).mul_ratio(26, 1000).to_milli_i64(), 260);
    }

    #[test]
    fn author_template_fills_both_fields() {
        let spec = WatermarkSpec::for_author("Ada", "2026-02-05");
        assert_eq!(spec.text, "author:Ada, date:2026-02-05 internal review");
        assert_eq!(spec.font_size, 26.0);
        assert_eq!(spec.angle_degrees, 60.0);
    }

    #[test]
    fn author_template_keeps_placeholders_in_names_literal() {
        let spec = WatermarkSpec::for_author("{date}", "2026-02-05");
        assert_eq!(spec.text, "author:{date}, date:2026-02-05 internal review");
        let spec = WatermarkSpec::for_author("Ada", "{name}");
        assert_eq!(spec.text, "author:Ada, date:{name} internal review");
    }

    #[test]
    fn whitespace_only_text_is_accepted() {
        let spec = WatermarkSpec::text("   ").normalized().expect("whitespace is text");
        assert_eq!(spec.text, "   ");
    }

    #[test]
    fn normalized_clamps_opacity_and_color() {
        let spec = WatermarkSpec::text("x")
            .with_opacity(3.0)
            .with_color(Color::rgb(-1.0, 0.5, 9.0))
            .normalized()
            .expect("valid");
        assert_eq!(spec.opacity, 1.0);
        assert_eq!(spec.color, Color::rgb(0.0, 0.5, 1.0));
    }

    #[test]
    fn normalized_rejects_degenerate_specs() {
        for spec in [
            WatermarkSpec::text(""),
            WatermarkSpec::text("x").with_font_size(0.0),
            WatermarkSpec::text("x").with_font_size(-4.0),
            WatermarkSpec::text("x").with_font_size(f32::INFINITY),
            WatermarkSpec::text("x").with_opacity(f32::NAN),
            WatermarkSpec::text("x").with_angle(f32::NAN),
        ] {
            let err = spec.normalized().expect_err("must fail");
            assert!(matches!(err, WatermarkError::InvalidWatermarkSpec(_)));
        }
    }

    #[test]
    fn geometry_rotation_is_normalized() {
        assert_eq!(PageGeometry::letter().with_rotation(-90).rotation, 270);
        assert_eq!(PageGeometry::letter().with_rotation(450).rotation, 90);
        assert_eq!(PageGeometry::new(100.0, 300.0).larger_side(), 300.0);
    }
}
