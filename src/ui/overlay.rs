use crate::types::{BgraImage, JOINT_COUNT, JointType};

pub const BONES: &[(JointType, JointType)] = &[
    (JointType::Head, JointType::ShoulderCenter),
    (JointType::ShoulderCenter, JointType::ShoulderLeft),
    (JointType::ShoulderCenter, JointType::ShoulderRight),
    (JointType::ShoulderCenter, JointType::Spine),
    (JointType::Spine, JointType::HipCenter),
    (JointType::HipCenter, JointType::HipLeft),
    (JointType::HipCenter, JointType::HipRight),
    (JointType::ShoulderLeft, JointType::ElbowLeft),
    (JointType::ElbowLeft, JointType::WristLeft),
    (JointType::WristLeft, JointType::HandLeft),
    (JointType::ShoulderRight, JointType::ElbowRight),
    (JointType::ElbowRight, JointType::WristRight),
    (JointType::WristRight, JointType::HandRight),
    (JointType::HipLeft, JointType::KneeLeft),
    (JointType::KneeLeft, JointType::AnkleLeft),
    (JointType::AnkleLeft, JointType::FootLeft),
    (JointType::HipRight, JointType::KneeRight),
    (JointType::KneeRight, JointType::AnkleRight),
    (JointType::AnkleRight, JointType::FootRight),
];

pub const BONE_THICKNESS: i32 = 3;
const JOINT_RADIUS: i32 = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct SkeletonOverlay {
    pub tracking_id: u32,
    pub joints: [Option<(f32, f32)>; JOINT_COUNT],
}

impl SkeletonOverlay {
    pub fn new(tracking_id: u32) -> Self {
        Self {
            tracking_id,
            joints: [None; JOINT_COUNT],
        }
    }

    pub fn joint(&self, joint: JointType) -> Option<(f32, f32)> {
        self.joints[joint.index()]
    }
}

pub fn draw_skeleton(image: &mut BgraImage, overlay: &SkeletonOverlay) {
    let bone_color = [248u8, 189u8, 56u8, 255u8];
    for &(a, b) in BONES {
        if let (Some(pa), Some(pb)) = (overlay.joint(a), overlay.joint(b)) {
            draw_line(image, pa, pb, bone_color, BONE_THICKNESS);
        }
    }

    let joint_color = [113u8, 113u8, 248u8, 255u8];
    let (w, h) = (image.width as f32, image.height as f32);
    for &(x, y) in overlay.joints.iter().flatten() {
        let reach = JOINT_RADIUS as f32;
        let inside = (-reach..=w + reach).contains(&x) && (-reach..=h + reach).contains(&y);
        if !inside {
            continue;
        }
        draw_circle(image, (x as i32, y as i32), JOINT_RADIUS, joint_color);
    }
}

/// Liang-Barsky clip of the segment to the image rectangle, widened by `pad`.
/// Runs in f64 so joints billions of pixels away still clip accurately.
fn clip_segment(
    p0: (f32, f32),
    p1: (f32, f32),
    width: u32,
    height: u32,
    pad: f64,
) -> Option<((f64, f64), (f64, f64))> {
    if ![p0.0, p0.1, p1.0, p1.1].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (x0, y0) = (f64::from(p0.0), f64::from(p0.1));
    let (dx, dy) = (f64::from(p1.0) - x0, f64::from(p1.1) - y0);
    let (max_x, max_y) = (f64::from(width) - 1.0 + pad, f64::from(height) - 1.0 + pad);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);

    for (p, q) in [
        (-dx, x0 + pad),
        (dx, max_x - x0),
        (-dy, y0 + pad),
        (dy, max_y - y0),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }

    Some(((x0 + t0 * dx, y0 + t0 * dy), (x0 + t1 * dx, y0 + t1 * dy)))
}

fn draw_line(
    image: &mut BgraImage,
    p0: (f32, f32),
    p1: (f32, f32),
    color: [u8; 4],
    thickness: i32,
) {
    let radius = (thickness.max(1) - 1) / 2;
    let Some((p0, p1)) = clip_segment(p0, p1, image.width, image.height, f64::from(radius)) else {
        return;
    };
    let (mut x0, mut y0) = (p0.0.round() as i32, p0.1.round() as i32);
    let (x1, y1) = (p1.0.round() as i32, p1.1.round() as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        image.put_pixel(x0, y0, color);
        if radius > 0 {
            for ox in -radius..=radius {
                for oy in -radius..=radius {
                    if (ox != 0 || oy != 0) && ox.abs() + oy.abs() <= radius {
                        image.put_pixel(x0 + ox, y0 + oy, color);
                    }
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(image: &mut BgraImage, center: (i32, i32), radius: i32, color: [u8; 4]) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                image.put_pixel(cx + dx, cy + dy, color);
            }
        }
    }
}
