use std::path::PathBuf;

pub fn is_file_exist(file_path: &str) -> Result<String, String> {
    let file_path = PathBuf::from(file_path);

    if file_path.exists() && file_path.is_file() {
        Ok(file_path.to_string_lossy().to_string())
    } else {
        Err(format!("file not found: {}", file_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_file_returns_ok() {
        let file = tempfile::NamedTempFile::new().unwrap();

        let result = is_file_exist(file.path().to_str().unwrap()).unwrap();
        assert_eq!(PathBuf::from(result), file.path());
    }

    #[test]
    fn nonexistent_file_returns_err() {
        let result = is_file_exist("/nonexistent/path/to/catalog.json");
        assert!(result.unwrap_err().contains("file not found"));
    }

    #[test]
    fn directory_returns_err() {
        let dir = tempfile::tempdir().unwrap();

        let result = is_file_exist(dir.path().to_str().unwrap());
        assert!(result.unwrap_err().contains("file not found"));
    }
}
