//! Overlay drawing on camera frames.
//!
//! Every function returns a guard that draws when dropped, so the result can be customized with
//! builder-style calls first.

use std::convert::Infallible;

use embedded_graphics::{
    draw_target::DrawTarget,
    mono_font::{ascii, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Line, PrimitiveStyle, Rectangle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};
use image::{Rgba, RgbaImage};

/// Guard returned by [`line`]; draws the line when dropped and allows customization.
pub struct DrawLine<'a> {
    image: &'a mut RgbaImage,
    start: Point,
    end: Point,
    color: Rgb888,
    stroke_width: u32,
}

impl DrawLine<'_> {
    /// Sets the line's color.
    pub fn color(&mut self, color: Rgb888) -> &mut Self {
        self.color = color;
        self
    }

    /// Sets the line's stroke width.
    ///
    /// By default, a stroke width of 1 is used.
    pub fn stroke_width(&mut self, width: u32) -> &mut Self {
        self.stroke_width = width;
        self
    }
}

impl Drop for DrawLine<'_> {
    fn drop(&mut self) {
        let style = PrimitiveStyle::with_stroke(self.color, self.stroke_width);
        match Line::new(self.start, self.end)
            .into_styled(style)
            .draw(&mut Target(&mut *self.image))
        {
            Ok(_) => {}
            Err(infallible) => match infallible {},
        }
    }
}

/// Guard returned by [`marker`]; draws the marker when dropped and allows customization.
pub struct DrawMarker<'a> {
    image: &'a mut RgbaImage,
    center: Point,
    color: Rgb888,
    size: u32,
}

impl DrawMarker<'_> {
    /// Sets the marker's color.
    pub fn color(&mut self, color: Rgb888) -> &mut Self {
        self.color = color;
        self
    }

    /// Sets the width and height of the marker.
    ///
    /// The default size is 5. The size must be *uneven* and *non-zero*. A size of 1 will result in
    /// a single pixel getting drawn.
    pub fn size(&mut self, size: u32) -> &mut Self {
        assert!(size != 0, "marker size must be greater than zero");
        assert!(size % 2 == 1, "marker size must be an uneven number");
        self.size = size;
        self
    }
}

impl Drop for DrawMarker<'_> {
    fn drop(&mut self) {
        let half = (self.size / 2) as i32;
        let top_left = self.center - Point::new(half, half);
        match Rectangle::new(top_left, Size::new(self.size, self.size))
            .into_styled(PrimitiveStyle::with_fill(self.color))
            .draw(&mut Target(&mut *self.image))
        {
            Ok(_) => {}
            Err(infallible) => match infallible {},
        }
    }
}

/// Guard returned by [`text`]; draws the text when dropped and allows customization.
pub struct DrawText<'a> {
    image: &'a mut RgbaImage,
    position: Point,
    text: &'a str,
    color: Rgb888,
    large: bool,
    alignment: Alignment,
    baseline: Baseline,
}

impl DrawText<'_> {
    /// Sets the text color.
    pub fn color(&mut self, color: Rgb888) -> &mut Self {
        self.color = color;
        self
    }

    /// Uses a 10x20 font instead of the default 6x10 one.
    pub fn large(&mut self) -> &mut Self {
        self.large = true;
        self
    }

    /// Aligns the left side of the text with the `x` coordinate.
    pub fn align_left(&mut self) -> &mut Self {
        self.alignment = Alignment::Left;
        self
    }

    /// Puts the text's baseline at the `y` coordinate, so the text sits on top of it.
    pub fn align_baseline(&mut self) -> &mut Self {
        self.baseline = Baseline::Alphabetic;
        self
    }
}

impl Drop for DrawText<'_> {
    fn drop(&mut self) {
        let font = if self.large {
            &ascii::FONT_10X20
        } else {
            &ascii::FONT_6X10
        };
        let character_style = MonoTextStyle::new(font, self.color);
        let text_style = TextStyleBuilder::new()
            .alignment(self.alignment)
            .baseline(self.baseline)
            .build();
        match Text::with_text_style(self.text, self.position, character_style, text_style)
            .draw(&mut Target(&mut *self.image))
        {
            Ok(_) => {}
            Err(infallible) => match infallible {},
        }
    }
}

/// Draws a line onto an image.
pub fn line(image: &mut RgbaImage, start: [f32; 2], end: [f32; 2]) -> DrawLine<'_> {
    DrawLine {
        image,
        start: point(start),
        end: point(end),
        color: Rgb888::BLUE,
        stroke_width: 1,
    }
}

/// Draws a small square marker centered at `x` and `y`.
pub fn marker(image: &mut RgbaImage, x: f32, y: f32) -> DrawMarker<'_> {
    DrawMarker {
        image,
        center: point([x, y]),
        color: Rgb888::GREEN,
        size: 5,
    }
}

/// Draws a text string onto an image.
///
/// By default, the text is drawn centered horizontally and vertically around `x` and `y`.
pub fn text<'a>(image: &'a mut RgbaImage, x: i32, y: i32, text: &'a str) -> DrawText<'a> {
    DrawText {
        image,
        position: Point::new(x, y),
        text,
        color: Rgb888::RED,
        large: false,
        alignment: Alignment::Center,
        baseline: Baseline::Middle,
    }
}

fn point([x, y]: [f32; 2]) -> Point {
    Point::new(x.round() as i32, y.round() as i32)
}

struct Target<'a>(&'a mut RgbaImage);

impl Dimensions for Target<'_> {
    fn bounding_box(&self) -> Rectangle {
        Rectangle {
            top_left: Point { x: 0, y: 0 },
            size: Size {
                width: self.0.width(),
                height: self.0.height(),
            },
        }
    }
}

impl DrawTarget for Target<'_> {
    type Color = Rgb888;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(pos, color) in pixels {
            if pos.x >= 0
                && (pos.x as u32) < self.0.width()
                && pos.y >= 0
                && (pos.y as u32) < self.0.height()
            {
                self.0.put_pixel(
                    pos.x as u32,
                    pos.y as u32,
                    Rgba([color.r(), color.g(), color.b(), 255]),
                );
            }
        }

        Ok(())
    }
}
