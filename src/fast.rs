use image::GrayImage;

/// 半径为 3 的 Bresenham 圆，按顺时针排列
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// 连续多少个像素满足条件才认为是角点
const ARC_LENGTH: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corner {
    pub x: u32,
    pub y: u32,
    pub score: u32,
}

/// FAST-9 角点检测，带 3x3 非极大值抑制
///
/// 只检测距离边缘至少 border 个像素的点，结果按行优先顺序排列
pub fn fast9(image: &GrayImage, threshold: u8, border: u32) -> Vec<Corner> {
    let (width, height) = image.dimensions();
    let border = border.max(3);
    if width <= 2 * border || height <= 2 * border {
        return vec![];
    }

    let raw = image.as_raw();
    let w = width as usize;
    let mut scores = vec![0u32; raw.len()];

    for y in border..height - border {
        for x in border..width - border {
            let idx = y as usize * w + x as usize;
            scores[idx] = corner_score(raw, w, x as i32, y as i32, threshold);
        }
    }

    let mut corners = vec![];
    for y in border..height - border {
        for x in border..width - border {
            let idx = y as usize * w + x as usize;
            let score = scores[idx];
            if score == 0 {
                continue;
            }
            if is_local_maximum(&scores, w, idx, score) {
                corners.push(Corner { x, y, score });
            }
        }
    }
    corners
}

/// 计算一个像素的角点得分，不是角点时返回 0
fn corner_score(raw: &[u8], w: usize, x: i32, y: i32, threshold: u8) -> u32 {
    let center = raw[y as usize * w + x as usize] as i32;
    let t = threshold as i32;

    // 1 表示更亮，-1 表示更暗
    let mut states = [0i8; 16];
    let mut diffs = [0i32; 16];
    for (i, (dx, dy)) in CIRCLE.iter().enumerate() {
        let v = raw[(y + dy) as usize * w + (x + dx) as usize] as i32;
        diffs[i] = v - center;
        if v > center + t {
            states[i] = 1;
        } else if v < center - t {
            states[i] = -1;
        }
    }

    for polarity in [1i8, -1] {
        if has_arc(&states, polarity) {
            let score = diffs
                .iter()
                .zip(states.iter())
                .filter(|(_, s)| **s == polarity)
                .map(|(d, _)| (d.abs() - t) as u32)
                .sum::<u32>();
            // 得分为 0 的角点会和“非角点”混淆
            return score.max(1);
        }
    }
    0
}

fn has_arc(states: &[i8; 16], polarity: i8) -> bool {
    let mut run = 0;
    // 圆是首尾相接的，所以遍历两圈
    for i in 0..32 {
        if states[i % 16] == polarity {
            run += 1;
            if run >= ARC_LENGTH {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// 得分相同的相邻点中，只保留行优先顺序里最靠前的一个
fn is_local_maximum(scores: &[u32], w: usize, idx: usize, score: u32) -> bool {
    let neighbors = [idx - w - 1, idx - w, idx - w + 1, idx - 1, idx + 1, idx + w - 1, idx + w, idx + w + 1];
    neighbors.iter().all(|&n| {
        let other = scores[n];
        other < score || (other == score && n > idx)
    })
}
