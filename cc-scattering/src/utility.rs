use std::{
    fs::{File, create_dir_all},
    io::Write,
    path::Path,
};

use serde::Serialize;

use crate::error::ScatteringError;

/// Saves `data` as pretty printed json at `path`, creating missing directories.
pub fn save_serialize(path: impl AsRef<Path>, data: &impl Serialize) -> Result<(), ScatteringError> {
    let path = path.as_ref();

    let buf = serde_json::to_string_pretty(data).map_err(|source| ScatteringError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            create_dir_all(parent).map_err(|e| ScatteringError::io(parent, e))?;
            tracing::info!("created path {}", parent.display());
        }
    }

    let mut file = File::create(path).map_err(|e| ScatteringError::io(path, e))?;
    file.write_all(buf.as_bytes())
        .map_err(|e| ScatteringError::io(path, e))?;

    tracing::info!("saved data on {}", path.display());
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::{grid::GridRange, utility::save_serialize};

    #[test]
    fn test_save_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("grid.json");

        let grid = GridRange::new(1., 2., 0.5);
        save_serialize(&path, &grid).unwrap();

        let loaded: GridRange = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, grid);
    }
}
