//! Page rotation.
//!
//! OCR engines see the page image as it is displayed, i.e. after the page
//! rotation stored in the document has been applied, and report coordinates
//! with the origin in the top-left corner. DjVu text zones use the unrotated
//! page with the origin in the bottom-left corner. [`Zone::rotate`] maps one
//! onto the other.
//!
//! The arithmetic mirrors the rectangle mapper of DjVuLibre: a transform is
//! described by an input rectangle, an output rectangle, and a combination of
//! axis swap and mirror flags; scaling uses exact rational rounding.

use super::bbox::BBox;
use super::zone::{Zone, ZoneChild, ZoneType};
use crate::error::{OcrodjvuError, Result};

const MIRROR_X: u8 = 1;
const MIRROR_Y: u8 = 2;
const SWAP_XY: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    xmin: i32,
    ymin: i32,
    xmax: i32,
    ymax: i32,
}

impl Rect {
    fn from_origin_size((x, y, w, h): (i32, i32, i32, i32)) -> Self {
        Self {
            xmin: x,
            ymin: y,
            xmax: x + w,
            ymax: y + h,
        }
    }

    fn width(&self) -> i32 {
        self.xmax - self.xmin
    }

    fn height(&self) -> i32 {
        self.ymax - self.ymin
    }
}

/// An axis-aligned affine transform between two rectangles.
///
/// Rectangles are given as `(x, y, width, height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffineTransform {
    from: Rect,
    to: Rect,
    code: u8,
}

impl AffineTransform {
    pub fn new(input: (i32, i32, i32, i32), output: (i32, i32, i32, i32)) -> Self {
        Self {
            from: Rect::from_origin_size(input),
            to: Rect::from_origin_size(output),
            code: 0,
        }
    }

    /// Compose with a counter-clockwise rotation by `degrees`, a multiple of 90.
    pub fn rotate(&mut self, degrees: i32) -> Result<()> {
        if degrees % 90 != 0 {
            return Err(OcrodjvuError::validation(format!(
                "rotation must be a multiple of 90 degrees, not {}",
                degrees
            )));
        }
        let old = self.code;
        match (degrees / 90).rem_euclid(4) {
            1 => {
                self.code ^= if self.code & SWAP_XY != 0 { MIRROR_Y } else { MIRROR_X };
                self.code ^= SWAP_XY;
            }
            2 => self.code ^= MIRROR_X | MIRROR_Y,
            3 => {
                self.code ^= if self.code & SWAP_XY != 0 { MIRROR_X } else { MIRROR_Y };
                self.code ^= SWAP_XY;
            }
            _ => {}
        }
        if (old ^ self.code) & SWAP_XY != 0 {
            std::mem::swap(&mut self.from.xmin, &mut self.from.ymin);
            std::mem::swap(&mut self.from.xmax, &mut self.from.ymax);
        }
        Ok(())
    }

    pub fn mirror_x(&mut self) {
        self.code ^= MIRROR_X;
    }

    pub fn mirror_y(&mut self) {
        self.code ^= MIRROR_Y;
    }

    /// Map a point of the input rectangle into the output rectangle.
    pub fn apply(&self, (x, y): (i32, i32)) -> (i32, i32) {
        let (mut mx, mut my) = (x, y);
        if self.code & SWAP_XY != 0 {
            std::mem::swap(&mut mx, &mut my);
        }
        if self.code & MIRROR_X != 0 {
            mx = self.from.xmin + self.from.xmax - mx;
        }
        if self.code & MIRROR_Y != 0 {
            my = self.from.ymin + self.from.ymax - my;
        }
        (
            self.to.xmin + scale(mx - self.from.xmin, self.to.width(), self.from.width()),
            self.to.ymin + scale(my - self.from.ymin, self.to.height(), self.from.height()),
        )
    }

    /// Map a point of the output rectangle back into the input rectangle.
    pub fn inverse(&self, (x, y): (i32, i32)) -> (i32, i32) {
        let mut mx = self.from.xmin + scale(x - self.to.xmin, self.from.width(), self.to.width());
        let mut my = self.from.ymin + scale(y - self.to.ymin, self.from.height(), self.to.height());
        if self.code & MIRROR_X != 0 {
            mx = self.from.xmin + self.from.xmax - mx;
        }
        if self.code & MIRROR_Y != 0 {
            my = self.from.ymin + self.from.ymax - my;
        }
        if self.code & SWAP_XY != 0 {
            std::mem::swap(&mut mx, &mut my);
        }
        (mx, my)
    }
}

/// `n * p / q`, rounded half away from zero. Degenerate ratios leave `n` unscaled.
fn scale(n: i32, p: i32, q: i32) -> i32 {
    if p == q || p == 0 || q == 0 {
        return n;
    }
    let x = i64::from(n) * i64::from(p);
    let q = i64::from(q);
    let scaled = if x >= 0 { (q / 2 + x) / q } else { -((q / 2 - x) / q) };
    scaled as i32
}

impl Zone {
    /// Map the tree from displayed-image coordinates onto page coordinates.
    ///
    /// Only a PAGE zone whose box starts at `(0, 0)` can be rotated; its box
    /// gives the size of the displayed image. Every box in the subtree is
    /// transformed corner by corner and normalized. With `rotation == 0` this
    /// is a vertical flip.
    pub fn rotate(&mut self, rotation: i32) -> Result<()> {
        if self.zone_type != ZoneType::Page {
            return Err(OcrodjvuError::malformed_ocr_output(format!(
                "the outermost zone is {} rather than page",
                self.zone_type
            )));
        }
        let (width, height) = match self.bbox.coordinates() {
            Some((0, 0, x1, y1)) => (x1, y1),
            _ => {
                return Err(OcrodjvuError::malformed_ocr_output(format!(
                    "page's bounding box ({}) should start with (0, 0)",
                    self.bbox
                )));
            }
        };
        if rotation % 90 != 0 {
            return Err(OcrodjvuError::validation(format!(
                "rotation must be a multiple of 90 degrees, not {}",
                rotation
            )));
        }
        let input = if (rotation / 90).rem_euclid(2) == 1 {
            (0, 0, height, width)
        } else {
            (0, 0, width, height)
        };
        let mut transform = AffineTransform::new(input, (0, 0, width, height));
        transform.mirror_y();
        transform.rotate(rotation)?;
        self.transform(&transform)
    }

    fn transform(&mut self, transform: &AffineTransform) -> Result<()> {
        let Some((x0, y0, x1, y1)) = self.bbox.coordinates() else {
            return Err(OcrodjvuError::malformed_ocr_output(format!(
                "{} zone without bounding box information",
                self.zone_type
            )));
        };
        let (ax, ay) = transform.inverse((x0, y0));
        let (bx, by) = transform.inverse((x1, y1));
        self.bbox = BBox::normalized(ax, ay, bx, by);
        for child in &mut self.children {
            if let ZoneChild::Zone(zone) = child {
                zone.transform(transform)?;
            }
        }
        Ok(())
    }
}
