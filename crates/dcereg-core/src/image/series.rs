//! A DCE time series: `num_images` images of `slices_per_image` slices each.

use ndarray::{Array2, Axis};

use crate::error::{RegistrationError, Result};

use super::{Dimension, Image, ImageGeometry};

#[derive(Clone, Debug)]
pub struct ImageSeries {
    images: Vec<Image>,
    /// Slices of each image arrive in reverse z order.
    flipped: bool,
}

impl ImageSeries {
    /// Build a series from images that all share one voxel grid.
    pub fn from_images(images: Vec<Image>) -> Result<Self> {
        let first = images.first().ok_or(RegistrationError::EmptySeries)?;
        for image in &images[1..] {
            first.ensure_same_size(image)?;
        }
        Ok(Self {
            images,
            flipped: false,
        })
    }

    /// Group a flat slice list, as delivered by a viewer, into images of
    /// `slices_per_image` consecutive slices. With `flipped` each group is
    /// reversed so z increases with the slice index.
    pub fn from_slices(
        slices: Vec<Array2<f32>>,
        slices_per_image: usize,
        flipped: bool,
        geometry: ImageGeometry,
    ) -> Result<Self> {
        if slices.is_empty() {
            return Err(RegistrationError::EmptySeries);
        }
        if slices_per_image == 0 || slices.len() % slices_per_image != 0 {
            return Err(RegistrationError::invalid_config(format!(
                "{} slices cannot be split into images of {} slices",
                slices.len(),
                slices_per_image
            )));
        }
        let images = slices
            .chunks(slices_per_image)
            .map(|chunk| {
                if flipped {
                    let reversed: Vec<Array2<f32>> = chunk.iter().rev().cloned().collect();
                    Image::from_slices(&reversed, geometry.clone())
                } else {
                    Image::from_slices(chunk, geometry.clone())
                }
            })
            .collect::<Result<Vec<_>>>()?;
        let mut series = Self::from_images(images)?;
        series.flipped = flipped;
        Ok(series)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn slices_per_image(&self) -> usize {
        self.images.first().map_or(0, Image::depth)
    }

    pub fn dimension(&self) -> Dimension {
        if self.slices_per_image() == 1 {
            Dimension::Two
        } else {
            Dimension::Three
        }
    }

    pub fn image(&self, index: usize) -> Result<&Image> {
        self.images
            .get(index)
            .ok_or(RegistrationError::ImageIndexOutOfRange {
                index,
                total: self.images.len(),
            })
    }

    /// Copy of image `index`.
    pub fn extract(&self, index: usize) -> Result<Image> {
        self.image(index).cloned()
    }

    /// Replace image `index` with `image`, which must match the series grid.
    pub fn insert(&mut self, index: usize, image: Image) -> Result<()> {
        let total = self.images.len();
        let slot = self
            .images
            .get_mut(index)
            .ok_or(RegistrationError::ImageIndexOutOfRange { index, total })?;
        slot.ensure_same_size(&image)?;
        *slot = image;
        Ok(())
    }

    /// One 2D slice of one image.
    pub fn slice(&self, index: usize, slice: usize) -> Result<Array2<f32>> {
        let image = self.image(index)?;
        if slice >= image.depth() {
            return Err(RegistrationError::ImageIndexOutOfRange {
                index: slice,
                total: image.depth(),
            });
        }
        Ok(image.slice(slice).to_owned())
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn is_flipped(&self) -> bool {
        self.flipped
    }

    /// Flatten back into the viewer's slice order.
    pub fn into_slices(self) -> Vec<Array2<f32>> {
        let flipped = self.flipped;
        self.images
            .into_iter()
            .flat_map(|image| {
                let mut slices: Vec<Array2<f32>> =
                    image.data.axis_iter(Axis(0)).map(|s| s.to_owned()).collect();
                if flipped {
                    slices.reverse();
                }
                slices
            })
            .collect()
    }
}
