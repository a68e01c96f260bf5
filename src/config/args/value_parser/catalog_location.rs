use crate::config::catalog::CatalogLocation;

use super::file_exist::is_file_exist;

/// Accept store and http(s) URLs as they are; local catalogs must exist.
pub fn check_catalog_location(location: &str) -> Result<String, String> {
    match CatalogLocation::parse(location)? {
        CatalogLocation::File(path) => is_file_exist(&path.to_string_lossy()),
        CatalogLocation::Store(_) | CatalogLocation::Http(_) => Ok(location.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_locations_are_accepted() {
        for location in [
            "s3://catalogs/s3mon/catalog.json",
            "memory:///memory/catalog.json",
            "https://example.com/catalog.json",
        ] {
            assert_eq!(check_catalog_location(location).unwrap(), location);
        }
    }

    #[test]
    fn local_catalog_must_exist() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(check_catalog_location(file.path().to_str().unwrap()).is_ok());

        let e = check_catalog_location("/nonexistent/catalog.json").unwrap_err();
        assert!(e.contains("file not found"));
    }

    #[test]
    fn malformed_locations_are_rejected() {
        assert!(check_catalog_location("s3://bucket-only").is_err());
        assert!(check_catalog_location("ftp://example.com/catalog.json").is_err());
        assert!(check_catalog_location("memory://").is_err());
    }
}
