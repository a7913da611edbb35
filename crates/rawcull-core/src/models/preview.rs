//! 预览图像数据模型

use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};

/// EXIF 方向（1-8）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u16", from = "u16")]
pub enum Orientation {
    #[default]
    Normal,
    FlipHorizontal,
    Rotate180,
    FlipVertical,
    Transpose,
    Rotate90,
    Transverse,
    Rotate270,
}

impl Orientation {
    /// 从 EXIF 值转换，未知值按 Normal 处理
    pub fn from_exif(value: u16) -> Self {
        match value {
            2 => Orientation::FlipHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::FlipVertical,
            5 => Orientation::Transpose,
            6 => Orientation::Rotate90,
            7 => Orientation::Transverse,
            8 => Orientation::Rotate270,
            _ => Orientation::Normal,
        }
    }

    pub fn exif_value(self) -> u16 {
        match self {
            Orientation::Normal => 1,
            Orientation::FlipHorizontal => 2,
            Orientation::Rotate180 => 3,
            Orientation::FlipVertical => 4,
            Orientation::Transpose => 5,
            Orientation::Rotate90 => 6,
            Orientation::Transverse => 7,
            Orientation::Rotate270 => 8,
        }
    }

    /// 旋转 90/270 度时宽高互换
    pub fn swaps_dimensions(self) -> bool {
        matches!(
            self,
            Orientation::Transpose
                | Orientation::Rotate90
                | Orientation::Transverse
                | Orientation::Rotate270
        )
    }

    /// 将方向应用到图像，得到正向显示的图像
    pub fn apply(self, img: DynamicImage) -> DynamicImage {
        match self {
            Orientation::Normal => img,
            Orientation::FlipHorizontal => img.fliph(),
            Orientation::Rotate180 => img.rotate180(),
            Orientation::FlipVertical => img.flipv(),
            Orientation::Transpose => img.rotate90().fliph(),
            Orientation::Rotate90 => img.rotate90(),
            Orientation::Transverse => img.rotate270().fliph(),
            Orientation::Rotate270 => img.rotate270(),
        }
    }
}

impl From<u16> for Orientation {
    fn from(value: u16) -> Self {
        Orientation::from_exif(value)
    }
}

impl From<Orientation> for u16 {
    fn from(o: Orientation) -> Self {
        o.exif_value()
    }
}

/// 已解码、已校正方向的预览图像
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewImage {
    pixels: RgbImage,
    orientation: Orientation,
    decoder: &'static str,
}

impl PreviewImage {
    /// `pixels` 必须已经应用过 `orientation`
    pub fn new(pixels: RgbImage, orientation: Orientation, decoder: &'static str) -> Self {
        Self {
            pixels,
            orientation,
            decoder,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// 源文件中记录的方向（已应用）
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// 产生这张预览的解码器名称
    pub fn decoder(&self) -> &'static str {
        self.decoder
    }

    /// 像素数据占用的字节数，用于缓存容量统计
    pub fn byte_size(&self) -> usize {
        self.pixels.as_raw().len()
    }

    pub fn to_dynamic(&self) -> DynamicImage {
        DynamicImage::ImageRgb8(self.pixels.clone())
    }
}
