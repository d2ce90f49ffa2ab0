use std::path::Path;
use anyhow::{Context, Result};

/// Ensure directory exists
pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {:?}", path))?;
    }
    Ok(())
}

/// Get lowercase file extension
pub fn get_extension<P: AsRef<Path>>(path: P) -> Option<String> {
    path.as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
}

/// File name without directories, lossy
pub fn base_name<P: AsRef<Path>>(path: P) -> String {
    path.as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Strip up to `n` trailing extensions from a file name.
///
/// GDC slide names carry a UUID segment before the format extension
/// (`TCGA-XX-0000-01Z-00-DX1.<uuid>.svs`), so two passes leave the barcode.
pub fn strip_extensions(name: &str, n: usize) -> String {
    let mut stem = name.to_string();
    for _ in 0..n {
        match Path::new(&stem).file_stem().and_then(|s| s.to_str()) {
            Some(s) if s != stem => stem = s.to_string(),
            _ => break,
        }
    }
    stem
}

/// Format number with commas
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}

/// Random number utilities
pub mod random {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Create RNG with fixed seed
    pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(seed)
    }

    /// Seeded when a seed is given, from OS entropy otherwise
    pub fn rng_from(seed: Option<u64>) -> ChaCha8Rng {
        match seed {
            Some(seed) => seeded_rng(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }
}

/// Validation utilities
pub mod validation {
    use anyhow::{bail, Result};

    /// Validate that value is in range
    pub fn in_range<T: PartialOrd + std::fmt::Display>(value: T, min: T, max: T, name: &str) -> Result<()> {
        if value < min || value > max {
            bail!("{} must be between {} and {}, got {}", name, min, max, value);
        }
        Ok(())
    }

    /// Validate that value is positive
    pub fn positive<T: PartialOrd + Default + std::fmt::Display>(value: T, name: &str) -> Result<()> {
        if value <= T::default() {
            bail!("{} must be positive, got {}", name, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1000000), "1,000,000");
        assert_eq!(format_number(999), "999");
    }

    #[test]
    fn test_strip_extensions() {
        assert_eq!(
            strip_extensions("TCGA-BR-4187-01Z-00-DX1.8f1a.svs", 2),
            "TCGA-BR-4187-01Z-00-DX1"
        );
        assert_eq!(strip_extensions("slide.png", 2), "slide");
        assert_eq!(strip_extensions("slide", 2), "slide");
    }

    #[test]
    fn test_seeded_rng() {
        use rand::Rng;

        let mut r1 = random::seeded_rng(42);
        let mut r2 = random::seeded_rng(42);
        let a: Vec<u32> = (0..4).map(|_| r1.gen()).collect();
        let b: Vec<u32> = (0..4).map(|_| r2.gen()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_validation() {
        assert!(validation::in_range(0.5, 0.0, 1.0, "value").is_ok());
        assert!(validation::in_range(1.5, 0.0, 1.0, "value").is_err());

        assert!(validation::positive(1usize, "value").is_ok());
        assert!(validation::positive(0usize, "value").is_err());
    }

    #[test]
    fn test_ensure_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
