use crate::{FuseError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pixel layouts the presentation side knows how to display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 32-bit colour, byte order B, G, R, A.
    Bgra32,
    /// 16-bit little-endian grayscale (depth and infrared).
    Gray16,
    /// 8-bit grayscale (body-index masks).
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra32 => 4,
            PixelFormat::Gray16 => 2,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// One colour pixel in the sensor's native BGRA32 layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Bgra {
    pub b: u8,
    pub g: u8,
    pub r: u8,
    pub a: u8,
}

impl Bgra {
    pub const ZERO: Bgra = Bgra { b: 0, g: 0, r: 0, a: 0 };

    /// Opaque colour from red, green and blue components.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Bgra {
        Bgra { b, g, r, a: 255 }
    }
}

/// Element type of an [`Image`].
pub trait Pixel: bytemuck::Pod {
    const FORMAT: PixelFormat;
}

impl Pixel for Bgra {
    const FORMAT: PixelFormat = PixelFormat::Bgra32;
}

impl Pixel for u16 {
    const FORMAT: PixelFormat = PixelFormat::Gray16;
}

impl Pixel for u8 {
    const FORMAT: PixelFormat = PixelFormat::Gray8;
}

/// Tightly packed, row-major pixel buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Image<P> {
    width: usize,
    height: usize,
    pixels: Vec<P>,
}

impl<P: Pixel> Image<P> {
    /// Allocate an image with every pixel set to `fill`.
    pub fn filled(width: usize, height: usize, fill: P) -> Self {
        Self {
            width,
            height,
            pixels: vec![fill; width * height],
        }
    }

    /// Wrap an existing pixel vector. The length must equal `width * height`.
    pub fn from_pixels(width: usize, height: usize, pixels: Vec<P>) -> Result<Self> {
        if pixels.len() != width * height {
            return Err(FuseError::InvalidImage(format!(
                "{}x{} image needs {} pixels, got {}",
                width,
                height,
                width * height,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Row length in bytes.
    pub fn stride(&self) -> usize {
        self.width * P::FORMAT.bytes_per_pixel()
    }

    pub fn format(&self) -> PixelFormat {
        P::FORMAT
    }

    pub fn pixels(&self) -> &[P] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [P] {
        &mut self.pixels
    }

    pub fn into_pixels(self) -> Vec<P> {
        self.pixels
    }

    /// Pixel at (x, y), or `None` outside the image.
    pub fn get(&self, x: usize, y: usize) -> Option<P> {
        if x < self.width && y < self.height {
            Some(self.pixels[y * self.width + x])
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }
}

/// A finished image ready for the presentation side.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputFrame {
    Bgra32(Image<Bgra>),
    Gray16(Image<u16>),
    Gray8(Image<u8>),
}

impl OutputFrame {
    pub fn format(&self) -> PixelFormat {
        match self {
            OutputFrame::Bgra32(_) => PixelFormat::Bgra32,
            OutputFrame::Gray16(_) => PixelFormat::Gray16,
            OutputFrame::Gray8(_) => PixelFormat::Gray8,
        }
    }

    pub fn width(&self) -> usize {
        match self {
            OutputFrame::Bgra32(img) => img.width(),
            OutputFrame::Gray16(img) => img.width(),
            OutputFrame::Gray8(img) => img.width(),
        }
    }

    pub fn height(&self) -> usize {
        match self {
            OutputFrame::Bgra32(img) => img.height(),
            OutputFrame::Gray16(img) => img.height(),
            OutputFrame::Gray8(img) => img.height(),
        }
    }

    pub fn stride(&self) -> usize {
        match self {
            OutputFrame::Bgra32(img) => img.stride(),
            OutputFrame::Gray16(img) => img.stride(),
            OutputFrame::Gray8(img) => img.stride(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            OutputFrame::Bgra32(img) => img.as_bytes(),
            OutputFrame::Gray16(img) => img.as_bytes(),
            OutputFrame::Gray8(img) => img.as_bytes(),
        }
    }
}

/// One synchronized set of sensor images from a single capture instant.
#[derive(Debug, Clone)]
pub struct FrameBundle {
    pub color: Image<Bgra>,
    /// Depth in millimetres, depth-camera resolution. 0 means no reading.
    pub depth: Image<u16>,
    pub infrared: Option<Image<u16>>,
    /// Device timestamp of the capture.
    pub timestamp: Duration,
}

/// One motion sample from the IMU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    /// Sensor temperature in degrees Celsius.
    pub temperature: f32,
    /// Accelerometer [x, y, z] in m/s².
    pub accelerometer: [f32; 3],
    pub accelerometer_timestamp: Duration,
    /// Gyroscope [x, y, z] in rad/s.
    pub gyro: [f32; 3],
    pub gyro_timestamp: Duration,
}

/// Body-index value marking pixels that belong to no tracked body.
pub const BODY_INDEX_BACKGROUND: u8 = 255;

/// Skeleton joints reported by the body tracker, in tracker order.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JointId {
    Pelvis,
    SpineNavel,
    SpineChest,
    Neck,
    ClavicleLeft,
    ShoulderLeft,
    ElbowLeft,
    WristLeft,
    HandLeft,
    HandTipLeft,
    ThumbLeft,
    ClavicleRight,
    ShoulderRight,
    ElbowRight,
    WristRight,
    HandRight,
    HandTipRight,
    ThumbRight,
    HipLeft,
    KneeLeft,
    AnkleLeft,
    FootLeft,
    HipRight,
    KneeRight,
    AnkleRight,
    FootRight,
    Head,
    Nose,
    EyeLeft,
    EarLeft,
    EyeRight,
    EarRight,
}

impl JointId {
    pub const COUNT: usize = 32;

    /// Every joint, in tracker order.
    pub const ALL: [JointId; JointId::COUNT] = [
        JointId::Pelvis,
        JointId::SpineNavel,
        JointId::SpineChest,
        JointId::Neck,
        JointId::ClavicleLeft,
        JointId::ShoulderLeft,
        JointId::ElbowLeft,
        JointId::WristLeft,
        JointId::HandLeft,
        JointId::HandTipLeft,
        JointId::ThumbLeft,
        JointId::ClavicleRight,
        JointId::ShoulderRight,
        JointId::ElbowRight,
        JointId::WristRight,
        JointId::HandRight,
        JointId::HandTipRight,
        JointId::ThumbRight,
        JointId::HipLeft,
        JointId::KneeLeft,
        JointId::AnkleLeft,
        JointId::FootLeft,
        JointId::HipRight,
        JointId::KneeRight,
        JointId::AnkleRight,
        JointId::FootRight,
        JointId::Head,
        JointId::Nose,
        JointId::EyeLeft,
        JointId::EarLeft,
        JointId::EyeRight,
        JointId::EarRight,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            JointId::Pelvis => "Pelvis",
            JointId::SpineNavel => "SpineNavel",
            JointId::SpineChest => "SpineChest",
            JointId::Neck => "Neck",
            JointId::ClavicleLeft => "ClavicleLeft",
            JointId::ShoulderLeft => "ShoulderLeft",
            JointId::ElbowLeft => "ElbowLeft",
            JointId::WristLeft => "WristLeft",
            JointId::HandLeft => "HandLeft",
            JointId::HandTipLeft => "HandTipLeft",
            JointId::ThumbLeft => "ThumbLeft",
            JointId::ClavicleRight => "ClavicleRight",
            JointId::ShoulderRight => "ShoulderRight",
            JointId::ElbowRight => "ElbowRight",
            JointId::WristRight => "WristRight",
            JointId::HandRight => "HandRight",
            JointId::HandTipRight => "HandTipRight",
            JointId::ThumbRight => "ThumbRight",
            JointId::HipLeft => "HipLeft",
            JointId::KneeLeft => "KneeLeft",
            JointId::AnkleLeft => "AnkleLeft",
            JointId::FootLeft => "FootLeft",
            JointId::HipRight => "HipRight",
            JointId::KneeRight => "KneeRight",
            JointId::AnkleRight => "AnkleRight",
            JointId::FootRight => "FootRight",
            JointId::Head => "Head",
            JointId::Nose => "Nose",
            JointId::EyeLeft => "EyeLeft",
            JointId::EarLeft => "EarLeft",
            JointId::EyeRight => "EyeRight",
            JointId::EarRight => "EarRight",
        }
    }
}

/// Discrete tracker confidence, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum JointConfidence {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl JointConfidence {
    pub fn name(self) -> &'static str {
        match self {
            JointConfidence::None => "None",
            JointConfidence::Low => "Low",
            JointConfidence::Medium => "Medium",
            JointConfidence::High => "High",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Joint {
    /// Position in depth-camera space, millimetres.
    pub position: [f32; 3],
    pub confidence: JointConfidence,
}

/// One tracked body and its skeleton.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub id: u32,
    pub joints: [Joint; JointId::COUNT],
}

impl Body {
    /// A body with every joint at the origin and no confidence.
    pub fn untracked(id: u32) -> Self {
        Self {
            id,
            joints: [Joint::default(); JointId::COUNT],
        }
    }

    pub fn joint(&self, id: JointId) -> &Joint {
        &self.joints[id.index()]
    }

    pub fn joint_mut(&mut self, id: JointId) -> &mut Joint {
        &mut self.joints[id.index()]
    }
}

/// Result of body tracking for one bundle.
#[derive(Debug, Clone)]
pub struct BodyFrame {
    pub bodies: Vec<Body>,
    /// Per-pixel body index at depth resolution; [`BODY_INDEX_BACKGROUND`] for no body.
    pub body_index: Image<u8>,
}

impl BodyFrame {
    pub fn number_of_bodies(&self) -> usize {
        self.bodies.len()
    }
}

/// Bounding box in normalized [0, 1] image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// One tagged detection returned by the remote detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub tag_name: String,
    pub probability: f64,
    pub bounding_box: BoundingBox,
}

/// What the capture loop renders.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisualizationMode {
    #[default]
    Color = 0,
    Depth = 1,
    Infrared = 2,
    BodyMask = 3,
    Skeleton = 4,
    BrandOverlay = 5,
}

impl VisualizationMode {
    pub const ALL: [VisualizationMode; 6] = [
        VisualizationMode::Color,
        VisualizationMode::Depth,
        VisualizationMode::Infrared,
        VisualizationMode::BodyMask,
        VisualizationMode::Skeleton,
        VisualizationMode::BrandOverlay,
    ];

    pub fn from_u8(value: u8) -> Option<VisualizationMode> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            VisualizationMode::Color => "Colour",
            VisualizationMode::Depth => "Depth",
            VisualizationMode::Infrared => "IR",
            VisualizationMode::BodyMask => "Body tracking",
            VisualizationMode::Skeleton => "Skeleton tracking",
            VisualizationMode::BrandOverlay => "Brand recognition",
        }
    }

    /// Parse a mode from a config string, case-insensitive.
    pub fn parse(s: &str) -> Option<VisualizationMode> {
        match s.trim().to_ascii_lowercase().as_str() {
            "color" | "colour" => Some(VisualizationMode::Color),
            "depth" => Some(VisualizationMode::Depth),
            "ir" | "infrared" => Some(VisualizationMode::Infrared),
            "bodymask" | "body" => Some(VisualizationMode::BodyMask),
            "skeleton" => Some(VisualizationMode::Skeleton),
            "brand" | "brandoverlay" => Some(VisualizationMode::BrandOverlay),
            _ => None,
        }
    }
}

/// Camera frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRate {
    Fps5,
    Fps15,
    Fps30,
}

impl FrameRate {
    pub fn hz(self) -> u32 {
        match self {
            FrameRate::Fps5 => 5,
            FrameRate::Fps15 => 15,
            FrameRate::Fps30 => 30,
        }
    }

    pub fn from_hz(hz: u32) -> Option<FrameRate> {
        match hz {
            5 => Some(FrameRate::Fps5),
            15 => Some(FrameRate::Fps15),
            30 => Some(FrameRate::Fps30),
            _ => None,
        }
    }

    pub fn frame_interval(self) -> Duration {
        Duration::from_secs(1) / self.hz()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    Bgra32,
    Mjpg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorResolution {
    R720p,
    R1080p,
    R1440p,
    R1536p,
    R2160p,
    R3072p,
}

impl ColorResolution {
    /// (width, height) in pixels.
    pub fn dimensions(self) -> (usize, usize) {
        match self {
            ColorResolution::R720p => (1280, 720),
            ColorResolution::R1080p => (1920, 1080),
            ColorResolution::R1440p => (2560, 1440),
            ColorResolution::R1536p => (2048, 1536),
            ColorResolution::R2160p => (3840, 2160),
            ColorResolution::R3072p => (4096, 3072),
        }
    }

    pub fn parse(s: &str) -> Option<ColorResolution> {
        match s.trim().to_ascii_lowercase().as_str() {
            "720p" => Some(ColorResolution::R720p),
            "1080p" => Some(ColorResolution::R1080p),
            "1440p" => Some(ColorResolution::R1440p),
            "1536p" => Some(ColorResolution::R1536p),
            "2160p" => Some(ColorResolution::R2160p),
            "3072p" => Some(ColorResolution::R3072p),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthMode {
    NfovBinned,
    NfovUnbinned,
    WfovBinned,
    WfovUnbinned,
    PassiveIr,
}

impl DepthMode {
    /// (width, height) of the depth image in pixels.
    pub fn dimensions(self) -> (usize, usize) {
        match self {
            DepthMode::NfovBinned => (320, 288),
            DepthMode::NfovUnbinned => (640, 576),
            DepthMode::WfovBinned => (512, 512),
            DepthMode::WfovUnbinned => (1024, 1024),
            DepthMode::PassiveIr => (1024, 1024),
        }
    }

    pub fn parse(s: &str) -> Option<DepthMode> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nfov_binned" | "nfov_2x2binned" => Some(DepthMode::NfovBinned),
            "nfov_unbinned" => Some(DepthMode::NfovUnbinned),
            "wfov_binned" | "wfov_2x2binned" => Some(DepthMode::WfovBinned),
            "wfov_unbinned" => Some(DepthMode::WfovUnbinned),
            "passive_ir" => Some(DepthMode::PassiveIr),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Sensor streams a session asks the device to produce.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Streams: u32 {
        const COLOR    = 1 << 0;
        const DEPTH    = 1 << 1;
        const INFRARED = 1 << 2;
        const IMU      = 1 << 3;
    }
}

/// Streaming parameters handed to the device provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub frame_rate: FrameRate,
    pub color_format: ColorFormat,
    pub color_resolution: ColorResolution,
    pub depth_mode: DepthMode,
    pub synchronized_images_only: bool,
    pub streams: Streams,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            frame_rate: FrameRate::Fps30,
            color_format: ColorFormat::Bgra32,
            color_resolution: ColorResolution::R1080p,
            depth_mode: DepthMode::WfovBinned,
            synchronized_images_only: true,
            streams: Streams::all(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_from_pixels_checks_length() {
        assert!(Image::from_pixels(2, 2, vec![0u16; 4]).is_ok());
        assert!(Image::from_pixels(2, 2, vec![0u16; 3]).is_err());
    }

    #[test]
    fn test_image_stride_and_bytes() {
        let img = Image::filled(3, 2, Bgra::rgb(1, 2, 3));
        assert_eq!(img.stride(), 12);
        assert_eq!(img.format(), PixelFormat::Bgra32);
        // B, G, R, A byte order
        assert_eq!(&img.as_bytes()[..4], &[3, 2, 1, 255]);
        assert_eq!(img.get(2, 1), Some(Bgra::rgb(1, 2, 3)));
        assert_eq!(img.get(3, 1), None);
    }

    #[test]
    fn test_joint_table_matches_discriminants() {
        for (i, joint) in JointId::ALL.iter().enumerate() {
            assert_eq!(joint.index(), i);
        }
        assert_eq!(JointId::ALL.len(), JointId::COUNT);
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(JointConfidence::Low < JointConfidence::Medium);
        assert!(JointConfidence::High >= JointConfidence::Medium);
        assert!(JointConfidence::None < JointConfidence::Low);
    }

    #[test]
    fn test_mode_round_trip_through_u8() {
        for mode in VisualizationMode::ALL {
            assert_eq!(VisualizationMode::from_u8(mode as u8), Some(mode));
        }
        assert_eq!(VisualizationMode::from_u8(6), None);
        assert_eq!(
            VisualizationMode::parse("Colour"),
            Some(VisualizationMode::Color)
        );
    }

    #[test]
    fn test_prediction_deserializes_camel_case() {
        let json = r#"{"tagName":"acme","probability":0.91,
            "boundingBox":{"left":0.1,"top":0.2,"width":0.3,"height":0.4}}"#;
        let p: Prediction = serde_json::from_str(json).unwrap();
        assert_eq!(p.tag_name, "acme");
        assert!((p.bounding_box.height - 0.4).abs() < 1e-12);
    }
}
