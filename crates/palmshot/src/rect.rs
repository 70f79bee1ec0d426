//! Axis-aligned rectangles for regions of interest.

use std::fmt;

/// An axis-aligned rectangle in image coordinates.
///
/// Rectangles are allowed to have zero height and/or width. Negative dimensions are not allowed.
#[derive(Clone, Copy, PartialEq)]
pub struct Rect {
    center: [f32; 2],
    size: [f32; 2],
}

impl Rect {
    /// Creates a rectangle extending outwards from a center point.
    #[inline]
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        assert!(width >= 0.0 && height >= 0.0, "negative rectangle size");
        Self {
            center: [x_center, y_center],
            size: [width, height],
        }
    }

    /// Creates a rectangle extending downwards and right from a point.
    #[inline]
    pub fn from_top_left(top_left_x: f32, top_left_y: f32, width: f32, height: f32) -> Self {
        Self::from_center(
            top_left_x + width * 0.5,
            top_left_y + height * 0.5,
            width,
            height,
        )
    }

    /// Computes the bounding rectangle that encompasses `points`.
    ///
    /// Returns [`None`] if `points` is an empty iterator.
    pub fn bounding<I: IntoIterator<Item = [f32; 2]>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();

        let first = iter.next()?;
        let (mut min, mut max) = (first, first);
        for [x, y] in iter {
            min = [min[0].min(x), min[1].min(y)];
            max = [max[0].max(x), max[1].max(y)];
        }

        Some(Self::from_top_left(
            min[0],
            min[1],
            max[0] - min[0],
            max[1] - min[1],
        ))
    }

    /// Returns the largest rectangle with the given aspect ratio that fits into a `width` by
    /// `height` image, centered in it.
    pub fn fit_aspect(width: u32, height: u32, aspect: f32) -> Self {
        let (w, h) = (width as f32, height as f32);
        let (fit_w, fit_h) = if w / h > aspect {
            (h * aspect, h)
        } else {
            (w, w / aspect)
        };
        Self::from_center(w * 0.5, h * 0.5, fit_w, fit_h)
    }

    /// Grows this rectangle by adding a margin relative to width and height.
    ///
    /// `amount` is the relative amount of the rectangles width and height to add to each side.
    #[must_use]
    pub fn grow_rel(&self, amount: f32) -> Self {
        let [w, h] = self.size;
        Self {
            center: self.center,
            size: [w + 2.0 * w * amount, h + 2.0 * h * amount],
        }
    }

    /// Symmetrically extends one dimension of `self` so that the resulting rectangle has the given
    /// aspect ratio (width divided by height).
    #[must_use]
    pub fn grow_to_fit_aspect(&self, aspect: f32) -> Self {
        let [w, h] = self.size;
        let target_width = h * aspect;
        let size = if target_width >= w {
            [target_width, h]
        } else {
            [w, w / aspect]
        };
        Self {
            center: self.center,
            size,
        }
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.center[0] - self.size[0] * 0.5
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.center[1] - self.size[1] * 0.5
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.size[0]
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.size[1]
    }

    #[inline]
    pub fn center(&self) -> [f32; 2] {
        self.center
    }

    /// Maps a point in a `res`-sized coordinate system that spans this rectangle back to the
    /// coordinate system the rectangle is defined in.
    pub fn transform_out(&self, [x, y]: [f32; 2], res: (u32, u32)) -> [f32; 2] {
        [
            self.x() + x * self.width() / res.0 as f32,
            self.y() + y * self.height() / res.1 as f32,
        ]
    }
}

impl fmt::Debug for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect @ ({:.1},{:.1})/{:.1}x{:.1}",
            self.x(),
            self.y(),
            self.width(),
            self.height()
        )
    }
}
