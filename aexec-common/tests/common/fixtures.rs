use aexec_common::ExecConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const DEVICE_ROOT: &str = "/data/local/tmp/go_android_exec";

/// Configuration pointing host state at `state_dir`.
pub fn test_config(state_dir: &Path) -> ExecConfig {
    ExecConfig {
        relay_program: "adb".to_string(),
        relay_flags: Vec::new(),
        proxy: "https://proxy.golang.org,direct".to_string(),
        device_root: DEVICE_ROOT.to_string(),
        state_dir: state_dir.to_path_buf(),
    }
}

/// A GOPATH-style tree holding `example.com/x/mobile/bind`:
///
/// ```text
/// src/example.com/x/mobile/go.mod
/// src/example.com/x/mobile/go.sum
/// src/example.com/x/mobile/bind/{a.go,b.go,a_test.go,notes.txt,testdata/}
/// ```
///
/// [`TestPackage::with_outer_ancestors`] adds files further up the tree.
pub struct TestPackage {
    pub dir: TempDir,
    pub package_dir: PathBuf,
    pub binary: PathBuf,
}

impl TestPackage {
    pub const IMPORT_PATH: &'static str = "example.com/x/mobile/bind";

    pub fn new() -> Self {
        crate::test_log!("FIXTURE: creating external package tree");

        let dir = TempDir::new().expect("Failed to create temp dir");
        let module_dir = dir.path().join("src/example.com/x/mobile");
        let package_dir = module_dir.join("bind");

        fs::create_dir_all(package_dir.join("testdata")).expect("Failed to create testdata");
        fs::write(package_dir.join("testdata/input.txt"), "data").unwrap();
        fs::write(module_dir.join("go.mod"), "module example.com/x/mobile\n").unwrap();
        fs::write(module_dir.join("go.sum"), "").unwrap();
        for name in ["b.go", "a.go", "a_test.go", "notes.txt"] {
            fs::write(package_dir.join(name), "package bind\n").unwrap();
        }

        let binary = dir.path().join("bind.test");
        fs::write(&binary, "\x7fELF").unwrap();

        Self {
            dir,
            package_dir,
            binary,
        }
    }

    /// Add ancestor files above the module: `testdata` two levels up
    /// (`src/example.com/x`) and a `go.mod` at the walk root (`src`).
    pub fn with_outer_ancestors(self) -> Self {
        let outer = self.dir.path().join("src/example.com/x");
        fs::create_dir_all(outer.join("testdata")).unwrap();
        fs::write(outer.join("testdata/shared.txt"), "shared").unwrap();
        fs::write(self.dir.path().join("src/go.mod"), "module root\n").unwrap();
        self
    }

    /// Local path `levels` directories above the package, as staged.
    pub fn local_up(&self, levels: usize, name: &str) -> String {
        (0..levels)
            .fold(self.package_dir.clone(), |dir, _| dir.join(".."))
            .join(name)
            .to_string_lossy()
            .into_owned()
    }

    pub fn local(&self, name: &str) -> String {
        self.package_dir.join(name).to_string_lossy().into_owned()
    }
}
