use opencv::core::Point;
use opencv::core::Rect;
use opencv::core::Scalar;
use opencv::imgproc::put_text;
use opencv::imgproc::FONT_HERSHEY_PLAIN;
use opencv::imgproc::LINE_8;
use opencv::imgproc::{rectangle, LineTypes};
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;

use super::{BoundingBox, PlateText};
use crate::error::Result;

const HEADER_HEIGHT: i32 = 20;
const THICKNESS_PX: i32 = 2;

/// Copy of `image` with the plate box drawn in green and the read text on a
/// filled header strip above it.
pub fn annotate(image: &Mat, plate_box: &BoundingBox, text: &PlateText) -> Result<Mat> {
    let mut canvas = image.try_clone()?;

    let green = Scalar::from((0.0, 255.0, 0.0));
    let white = Scalar::from((255.0, 255.0, 255.0));

    rectangle(
        &mut canvas,
        plate_box.to_rect(),
        green,
        THICKNESS_PX,
        LineTypes::LINE_4 as i32,
        0,
    )?;

    let label = text.as_plate().unwrap_or(crate::DETECT_FAILED);
    let header_top = (plate_box.y1 - HEADER_HEIGHT).max(0);
    let header = Rect::new(plate_box.x1, header_top, plate_box.width(), HEADER_HEIGHT);
    rectangle(&mut canvas, header, green, -1, LineTypes::LINE_4 as i32, 0)?;
    put_text(
        &mut canvas,
        label,
        Point::new(plate_box.x1, header_top + HEADER_HEIGHT - 4),
        FONT_HERSHEY_PLAIN,
        1.2,
        white,
        1,
        LINE_8,
        false,
    )?;

    Ok(canvas)
}
