//! Debug grid overlay: burns a regular grid into an image before it is
//! warped, so the deformation is visible in the result.

use ndarray::Axis;

use crate::consts::{TAG_GRID_DIVISIONS, TAG_PIXEL_VALUE};
use crate::image::Image;

/// Set every pixel on a `TAG_GRID_DIVISIONS` x `TAG_GRID_DIVISIONS` grid
/// to `TAG_PIXEL_VALUE`, in every slice.
pub fn tag_grid(image: &mut Image) {
    let (_, h, w) = image.data.dim();
    let row_step = (h / TAG_GRID_DIVISIONS).max(1);
    let col_step = (w / TAG_GRID_DIVISIONS).max(1);
    for mut slice in image.data.axis_iter_mut(Axis(0)) {
        for ((y, x), v) in slice.indexed_iter_mut() {
            if y % row_step == 0 || x % col_step == 0 {
                *v = TAG_PIXEL_VALUE;
            }
        }
    }
}
