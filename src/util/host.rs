//! Host introspection

/// Number of logical cores available to this process, at least 1
pub fn logical_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_cores_is_positive() {
        assert!(logical_cores() >= 1);
    }
}
