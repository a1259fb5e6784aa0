use nalgebra::Vector3;

pub const BGRA_BYTES: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ColorImageFormat {
    #[default]
    Undefined,
    Rgb640x480Fps30,
    Rgb1280x960Fps12,
}

impl ColorImageFormat {
    pub fn size(&self) -> (u32, u32) {
        match self {
            ColorImageFormat::Undefined => (0, 0),
            ColorImageFormat::Rgb640x480Fps30 => (640, 480),
            ColorImageFormat::Rgb1280x960Fps12 => (1280, 960),
        }
    }

    pub fn pixel_count(&self) -> usize {
        let (w, h) = self.size();
        w as usize * h as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum DepthImageFormat {
    #[default]
    Undefined,
    Resolution80x60Fps30,
    Resolution320x240Fps30,
    Resolution640x480Fps30,
}

impl DepthImageFormat {
    pub fn size(&self) -> (u32, u32) {
        match self {
            DepthImageFormat::Undefined => (0, 0),
            DepthImageFormat::Resolution80x60Fps30 => (80, 60),
            DepthImageFormat::Resolution320x240Fps30 => (320, 240),
            DepthImageFormat::Resolution640x480Fps30 => (640, 480),
        }
    }

    pub fn pixel_count(&self) -> usize {
        let (w, h) = self.size();
        w as usize * h as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct FrameFormat {
    pub color: ColorImageFormat,
    pub depth: DepthImageFormat,
    pub skeleton_capacity: usize,
}

/// One depth sample in millimetres plus the runtime's body segmentation.
/// `player_index` is 0 for background, otherwise skeleton slot + 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DepthPixel {
    pub depth: u16,
    pub player_index: u8,
}

impl DepthPixel {
    pub const UNKNOWN: DepthPixel = DepthPixel {
        depth: 0,
        player_index: 0,
    };

    pub fn new(depth: u16, player_index: u8) -> Self {
        Self {
            depth,
            player_index,
        }
    }

    pub fn is_known_depth(&self) -> bool {
        self.depth != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DepthImagePoint {
    pub x: i32,
    pub y: i32,
    pub depth: u16,
}

impl DepthImagePoint {
    pub fn new(x: i32, y: i32, depth: u16) -> Self {
        Self { x, y, depth }
    }

    /// Linear index into a `width` x `height` image when the point lies inside it.
    pub fn index_in(&self, width: u32, height: u32) -> Option<usize> {
        if self.x < 0 || self.y < 0 {
            return None;
        }
        let (x, y) = (self.x as u32, self.y as u32);
        if x >= width || y >= height {
            return None;
        }
        Some(y as usize * width as usize + x as usize)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JointType {
    HipCenter,
    Spine,
    /// Base of the neck.
    ShoulderCenter,
    Head,
    ShoulderLeft,
    ElbowLeft,
    WristLeft,
    HandLeft,
    ShoulderRight,
    ElbowRight,
    WristRight,
    HandRight,
    HipLeft,
    KneeLeft,
    AnkleLeft,
    FootLeft,
    HipRight,
    KneeRight,
    AnkleRight,
    FootRight,
}

pub const JOINT_COUNT: usize = 20;

impl JointType {
    pub const ALL: [JointType; JOINT_COUNT] = [
        JointType::HipCenter,
        JointType::Spine,
        JointType::ShoulderCenter,
        JointType::Head,
        JointType::ShoulderLeft,
        JointType::ElbowLeft,
        JointType::WristLeft,
        JointType::HandLeft,
        JointType::ShoulderRight,
        JointType::ElbowRight,
        JointType::WristRight,
        JointType::HandRight,
        JointType::HipLeft,
        JointType::KneeLeft,
        JointType::AnkleLeft,
        JointType::FootLeft,
        JointType::HipRight,
        JointType::KneeRight,
        JointType::AnkleRight,
        JointType::FootRight,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JointTrackingState {
    #[default]
    NotTracked,
    Inferred,
    Tracked,
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Joint {
    /// Sensor space, metres.
    pub position: Vector3<f32>,
    pub state: JointTrackingState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SkeletonTrackingState {
    #[default]
    NotTracked,
    PositionOnly,
    Tracked,
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Skeleton {
    pub tracking_id: u32,
    pub state: SkeletonTrackingState,
    /// Body centre in sensor space, metres.
    pub position: Vector3<f32>,
    pub joints: [Joint; JOINT_COUNT],
}

impl Skeleton {
    pub fn joint(&self, joint: JointType) -> &Joint {
        &self.joints[joint.index()]
    }

    pub fn joint_mut(&mut self, joint: JointType) -> &mut Joint {
        &mut self.joints[joint.index()]
    }

    pub fn is_tracked(&self) -> bool {
        self.state == SkeletonTrackingState::Tracked
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BgraImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl BgraImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0u8; width as usize * height as usize * BGRA_BYTES],
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels
            .resize(width as usize * height as usize * BGRA_BYTES, 0);
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * BGRA_BYTES;
        let px = self.pixels.get(idx..idx + BGRA_BYTES)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    pub fn put_pixel(&mut self, x: i32, y: i32, color: [u8; 4]) {
        if x < 0 || y < 0 {
            return;
        }
        let (ux, uy) = (x as u32, y as u32);
        if ux >= self.width || uy >= self.height {
            return;
        }
        let idx = (uy as usize * self.width as usize + ux as usize) * BGRA_BYTES;
        if let Some(dst) = self.pixels.get_mut(idx..idx + BGRA_BYTES) {
            dst.copy_from_slice(&color);
        }
    }
}

pub fn gray_bgra(value: u8) -> [u8; 4] {
    [value, value, value, 255]
}
