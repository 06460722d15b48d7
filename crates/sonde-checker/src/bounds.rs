use std::sync::OnceLock;

use regex::Regex;

/// Screen rectangle of a widget, `[left,top][right,bottom]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed bounds {raw:?}")]
pub struct BoundsError {
    pub raw: String,
}

fn bounds_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]").expect("static bounds pattern")
    })
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, BoundsError> {
        let err = || BoundsError {
            raw: raw.to_string(),
        };
        let caps = bounds_pattern().captures(raw).ok_or_else(err)?;
        let coord = |i: usize| caps[i].parse::<i32>().map_err(|_| err());
        Ok(Self::new(coord(1)?, coord(2)?, coord(3)?, coord(4)?))
    }

    pub fn center(&self) -> [f64; 2] {
        [
            (f64::from(self.left) + f64::from(self.right)) / 2.0,
            (f64::from(self.top) + f64::from(self.bottom)) / 2.0,
        ]
    }

    pub fn lower(&self) -> [f64; 2] {
        [f64::from(self.left), f64::from(self.top)]
    }

    pub fn upper(&self) -> [f64; 2] {
        [f64::from(self.right), f64::from(self.bottom)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(
            Bounds::parse("[0,63][1080,2274]").unwrap(),
            Bounds::new(0, 63, 1080, 2274)
        );
    }

    #[test]
    fn test_parse_negative() {
        assert_eq!(
            Bounds::parse("[-20,-5][10,10]").unwrap(),
            Bounds::new(-20, -5, 10, 10)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Bounds::parse("0,0,10,10").is_err());
        assert!(Bounds::parse("[0,0][99999999999,1]").is_err());
    }

    #[test]
    fn test_center() {
        assert_eq!(Bounds::new(10, 10, 50, 50).center(), [30.0, 30.0]);
        assert_eq!(Bounds::new(0, 0, 5, 5).center(), [2.5, 2.5]);
    }
}
