use serde::{Deserialize, Serialize};

/// Query window for history listings. The backend accepts `limit` in
/// `1..=100`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PaginationParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 { 20 }

impl PaginationParams {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit: limit.clamp(1, 100), offset }
    }

    pub fn next(&self) -> Self {
        Self { limit: self.limit, offset: self.offset + self.limit }
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { limit: default_limit(), offset: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        assert_eq!(PaginationParams::new(0, 0).limit, 1);
        assert_eq!(PaginationParams::new(500, 0).limit, 100);
    }

    #[test]
    fn next_page() {
        let p = PaginationParams::default().next();
        assert_eq!((p.limit, p.offset), (20, 20));
    }
}
