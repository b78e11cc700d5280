//! Generated run scripts.
//!
//! Everything here is a pure function of the configuration: fixed templates
//! with path substitution only. Materializing always overwrites with the
//! canonical content.

use crate::config::{ProvisionConfig, ScriptFlavor};
use crate::install::StepError;
use std::path::PathBuf;

/// One `pip install` line. Requirements sharing a line are resolved
/// together against the same index.
struct Package {
    requirements: &'static [&'static str],
    extra_args: &'static [&'static str],
}

macro_rules! pkg {
    ($($requirement:literal),+) => {
        Package {
            requirements: &[$($requirement),+],
            extra_args: &[],
        }
    };
}

/// Dependency groups in install order.
const PACKAGE_GROUPS: &[(&str, &[Package])] = &[
    (
        "Installing core dependencies...",
        &[
            pkg!("numpy>=1.21.0"),
            pkg!("scipy>=1.7.0"),
            pkg!("Pillow>=8.0.0"),
            pkg!("matplotlib>=3.3.0"),
        ],
    ),
    (
        "Installing PyTorch ecosystem...",
        &[Package {
            requirements: &["torch", "torchvision"],
            extra_args: &["--index-url", "https://download.pytorch.org/whl/cpu"],
        }],
    ),
    (
        "Installing computer vision packages...",
        &[pkg!("opencv-python>=4.5.0.0"), pkg!("scikit-image>=0.18.0")],
    ),
    (
        "Installing Detectron2 for Mask R-CNN...",
        &[Package {
            requirements: &["detectron2"],
            extra_args: &[
                "-f",
                "https://dl.fbaipublicfiles.com/detectron2/wheels/cpu/torch2.0/index.html",
            ],
        }],
    ),
    (
        "Installing additional required packages...",
        &[pkg!("h5py>=3.1.0"), pkg!("IPython>=7.16.0"), pkg!("pycocotools")],
    ),
];

/// Rendered text of every generated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedScripts {
    /// Dependency-install script.
    pub setup: String,
    /// Launcher script.
    pub launcher: String,
    /// Entry-point program.
    pub entry: String,
}

/// Render all templates for `config`.
pub fn render(config: &ProvisionConfig) -> RenderedScripts {
    RenderedScripts {
        setup: render_setup(config),
        launcher: render_launcher(config),
        entry: render_entry(config),
    }
}

/// Write every generated file under the install root and create the
/// images directory. Returns the paths written.
pub fn materialize(config: &ProvisionConfig) -> Result<Vec<PathBuf>, StepError> {
    let root = &config.install_root;
    std::fs::create_dir_all(root).map_err(|e| StepError::io(root, e))?;

    let rendered = render(config);
    let files = [
        (config.setup_script_path(), rendered.setup, true),
        (config.launcher_script_path(), rendered.launcher, true),
        (config.entry_program_path(), rendered.entry, false),
    ];

    let mut written = Vec::with_capacity(files.len());
    for (path, content, executable) in files {
        std::fs::write(&path, content).map_err(|e| StepError::io(&path, e))?;
        if executable && config.scripts == ScriptFlavor::Posix {
            mark_executable(&path)?;
        }
        written.push(path);
    }

    let images = config.images_path();
    std::fs::create_dir_all(&images).map_err(|e| StepError::io(&images, e))?;

    tracing::debug!(root = %root.display(), files = written.len(), "scripts materialized");
    Ok(written)
}

#[cfg(unix)]
fn mark_executable(path: &std::path::Path) -> Result<(), StepError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| StepError::io(path, e))
}

#[cfg(not(unix))]
fn mark_executable(_path: &std::path::Path) -> Result<(), StepError> {
    Ok(())
}

fn pip_line(package: &Package) -> String {
    let mut line = "pip install".to_string();
    for requirement in package.requirements {
        line.push_str(&format!(" \"{requirement}\""));
    }
    for arg in package.extra_args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

fn render_setup(config: &ProvisionConfig) -> String {
    let root = config.install_root.display().to_string();
    let env = &config.layout.environment_dir;
    let mut out = Vec::new();

    match config.scripts {
        ScriptFlavor::Batch => {
            out.push("@echo off".to_string());
            out.push("echo ========================================".to_string());
            out.push("echo Python 3.9 Environment Setup - Modern PyTorch/Detectron2".to_string());
            out.push("echo ========================================".to_string());
            out.push("cd /d \"%~dp0\"".to_string());
            out.push("SET FAILED=0".to_string());
            out.push("echo Activating virtual environment...".to_string());
            out.push(format!("call {env}\\Scripts\\activate.bat"));
            out.push("IF ERRORLEVEL 1 (".to_string());
            out.push("    echo ERROR: Failed to activate virtual environment!".to_string());
            out.push("    exit /b 1".to_string());
            out.push(")".to_string());
            out.push(String::new());
            out.push("python --version".to_string());
            out.push("python -m pip install --upgrade pip".to_string());
            for (heading, packages) in PACKAGE_GROUPS {
                out.push(String::new());
                out.push(format!("echo {heading}"));
                for package in *packages {
                    out.push(pip_line(package));
                    out.push("IF ERRORLEVEL 1 SET FAILED=1".to_string());
                }
            }
            out.push(String::new());
            out.push("echo ========================================".to_string());
            out.push(format!("echo Environment location: {root}\\{env}"));
            out.push("echo To activate this environment manually:".to_string());
            out.push(format!("echo   cd {root}"));
            out.push(format!("echo   {env}\\Scripts\\activate"));
            out.push("echo Installed packages:".to_string());
            out.push("python -m pip list".to_string());
            out.push("exit /b %FAILED%".to_string());
        }
        ScriptFlavor::Posix => {
            out.push("#!/bin/sh".to_string());
            out.push("echo \"========================================\"".to_string());
            out.push("echo \"Python 3.9 Environment Setup - Modern PyTorch/Detectron2\"".to_string());
            out.push("echo \"========================================\"".to_string());
            out.push("cd \"$(dirname \"$0\")\" || exit 1".to_string());
            out.push("FAILED=0".to_string());
            out.push("echo \"Activating virtual environment...\"".to_string());
            out.push(format!(
                ". \"{env}/bin/activate\" || {{ echo \"ERROR: Failed to activate virtual environment!\"; exit 1; }}"
            ));
            out.push(String::new());
            out.push("python --version".to_string());
            out.push("python -m pip install --upgrade pip".to_string());
            for (heading, packages) in PACKAGE_GROUPS {
                out.push(String::new());
                out.push(format!("echo \"{heading}\""));
                for package in *packages {
                    out.push(format!("{} || FAILED=1", pip_line(package)));
                }
            }
            out.push(String::new());
            out.push("echo \"========================================\"".to_string());
            out.push(format!("echo \"Environment location: {root}/{env}\""));
            out.push("echo \"To activate this environment manually:\"".to_string());
            out.push(format!("echo \"  cd {root}\""));
            out.push(format!("echo \"  . {env}/bin/activate\""));
            out.push("echo \"Installed packages:\"".to_string());
            out.push("python -m pip list".to_string());
            out.push("exit $FAILED".to_string());
        }
    }

    out.push(String::new());
    out.join("\n")
}

const LAUNCHER_BATCH: &str = r#"@echo off
echo ========================================
echo MaskRCNN Architectural Elements Detection
echo ========================================
echo.

SET "SCRIPT_DIR=%~dp0"
SET "VENV_PATH=%SCRIPT_DIR%@ENV@"

IF NOT EXIST "%VENV_PATH%\Scripts\activate.bat" (
    echo ERROR: Virtual environment not found!
    echo Expected location: %VENV_PATH%
    echo Please make sure the virtual environment is properly installed.
    pause
    exit /b 1
)

IF NOT EXIST "%SCRIPT_DIR%@ENTRY@" (
    echo ERROR: @ENTRY@ not found!
    echo Expected location: %SCRIPT_DIR%@ENTRY@
    pause
    exit /b 1
)

echo Activating virtual environment...
CALL "%VENV_PATH%\Scripts\activate.bat"
IF ERRORLEVEL 1 (
    echo ERROR: Failed to activate virtual environment!
    pause
    exit /b 1
)

python --version
python -c "import torch; print('PyTorch version:', torch.__version__)"

echo Starting MaskRCNN detection...
cd /d "%SCRIPT_DIR%"
python @ENTRY@
IF ERRORLEVEL 1 (
    echo ERROR: Python script execution failed!
    echo Please check the error messages above.
) ELSE (
    echo MaskRCNN detection completed successfully!
)

call deactivate
pause
"#;

const LAUNCHER_POSIX: &str = r#"#!/bin/sh
echo "========================================"
echo "MaskRCNN Architectural Elements Detection"
echo "========================================"

SCRIPT_DIR="$(cd "$(dirname "$0")" && pwd)"
VENV_PATH="$SCRIPT_DIR/@ENV@"

if [ ! -f "$VENV_PATH/bin/activate" ]; then
    echo "ERROR: Virtual environment not found!"
    echo "Expected location: $VENV_PATH"
    echo "Please make sure the virtual environment is properly installed."
    exit 1
fi

if [ ! -f "$SCRIPT_DIR/@ENTRY@" ]; then
    echo "ERROR: @ENTRY@ not found!"
    echo "Expected location: $SCRIPT_DIR/@ENTRY@"
    exit 1
fi

echo "Activating virtual environment..."
. "$VENV_PATH/bin/activate" || {
    echo "ERROR: Failed to activate virtual environment!"
    exit 1
}

python --version
python -c "import torch; print('PyTorch version:', torch.__version__)"

echo "Starting MaskRCNN detection..."
cd "$SCRIPT_DIR" || exit 1
STATUS=0
if python "@ENTRY@"; then
    echo "MaskRCNN detection completed successfully!"
else
    echo "ERROR: Python script execution failed!"
    echo "Please check the error messages above."
    STATUS=1
fi

deactivate
exit $STATUS
"#;

fn render_launcher(config: &ProvisionConfig) -> String {
    let template = match config.scripts {
        ScriptFlavor::Batch => LAUNCHER_BATCH,
        ScriptFlavor::Posix => LAUNCHER_POSIX,
    };
    template
        .replace("@ENV@", &config.layout.environment_dir)
        .replace("@ENTRY@", &config.layout.entry_program)
}

const ENTRY_PROGRAM: &str = r#"import os
import sys

print("=" * 50)
print("MASKRCNN ARCHITECTURAL ELEMENTS DETECTION")
print("=" * 50)

ROOT_DIR = os.path.abspath("@ROOT@")
print(f"ROOT_DIR: {ROOT_DIR}")

try:
    import torch
    print(f"✅ PyTorch version: {torch.__version__}")
    if torch.cuda.is_available():
        print(f"✅ CUDA GPU found: {torch.cuda.get_device_name(0)}")
        print(f"   CUDA version: {torch.version.cuda}")
    else:
        print("ℹ️ No CUDA GPU found, using CPU")
except ImportError as e:
    print(f"❌ PyTorch import failed: {e}")
    print("Please install PyTorch:")
    print("  pip install torch torchvision --index-url https://download.pytorch.org/whl/cpu")
    sys.exit(1)

try:
    import detectron2
    from detectron2 import model_zoo
    from detectron2.engine import DefaultPredictor
    from detectron2.config import get_cfg
    print(f"✅ Detectron2 version: {detectron2.__version__}")
except ImportError as e:
    print(f"❌ Detectron2 import failed: {e}")
    print("Please install Detectron2:")
    print("  pip install detectron2 -f https://dl.fbaipublicfiles.com/detectron2/wheels/cpu/torch2.0/index.html")
    sys.exit(1)

try:
    import numpy as np
    import matplotlib
    matplotlib.use("Agg")
    import cv2
    from PIL import Image
    print(f"✅ NumPy version: {np.__version__}")
    print(f"✅ OpenCV version: {cv2.__version__}")
except ImportError as e:
    print(f"❌ Failed to import required packages: {e}")
    sys.exit(1)

IMAGE_DIR = os.path.join(ROOT_DIR, "@IMAGES@")
MODEL_DIR = os.path.join(ROOT_DIR, "logs")

os.makedirs(MODEL_DIR, exist_ok=True)
os.makedirs(IMAGE_DIR, exist_ok=True)

EXTENSIONS = (".png", ".jpg", ".jpeg", ".bmp", ".tiff")
image_files = sorted(f for f in os.listdir(IMAGE_DIR) if f.lower().endswith(EXTENSIONS))

print(f"\nFound {len(image_files)} image files:")
for name in image_files[:5]:
    print(f"  - {name}")
if len(image_files) > 5:
    print(f"  ... and {len(image_files) - 5} more")

if not image_files:
    print("\n❌ NO IMAGES FOUND!")
    print("Please add test images to the images folder:")
    print(f"   {IMAGE_DIR}")
    print("\nSupported formats: PNG, JPG, JPEG, BMP, TIFF")
    sys.exit(0)

print("\n" + "=" * 50)
print("PROCESSING COMPLETED - DEMO MODE")
print("Images found and ready for processing.")
print("=" * 50)
"#;

fn render_entry(config: &ProvisionConfig) -> String {
    let root = config
        .install_root
        .display()
        .to_string()
        .replace('\\', "/")
        .replace('"', "\\\"");
    ENTRY_PROGRAM
        .replace("@ROOT@", &root)
        .replace("@IMAGES@", &config.layout.images_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(flavor: ScriptFlavor, root: &str) -> ProvisionConfig {
        let mut config = ProvisionConfig::default().with_install_root(root);
        config.scripts = flavor;
        config
    }

    #[test]
    fn test_setup_installs_packages_in_order() {
        let setup = render(&config(ScriptFlavor::Posix, "/srv/aed")).setup;
        let numpy = setup.find("numpy>=1.21.0").unwrap();
        let torch = setup.find("\"torch\"").unwrap();
        let detectron = setup.find("detectron2").unwrap();
        let pycoco = setup.find("pycocotools").unwrap();
        assert!(numpy < torch && torch < detectron && detectron < pycoco);

        // torch and torchvision resolve together from the CPU wheel index.
        let torch_line = setup.lines().find(|l| l.contains("\"torch\"")).unwrap();
        assert_eq!(
            torch_line,
            "pip install \"torch\" \"torchvision\" --index-url https://download.pytorch.org/whl/cpu || FAILED=1"
        );
        assert_eq!(setup.matches("torchvision\"").count(), 1);
        assert!(setup.contains(". \"venv/bin/activate\""));
        assert!(setup.ends_with("exit $FAILED\n"));
    }

    #[test]
    fn test_batch_setup_quotes_requirements() {
        let setup = render(&config(ScriptFlavor::Batch, r"C:\AED")).setup;
        assert!(setup.contains("pip install \"numpy>=1.21.0\""));
        assert!(setup.contains(r"call venv\Scripts\activate.bat"));
        assert!(setup.contains(r"echo Environment location: C:\AED\venv"));
        assert!(setup.contains("exit /b %FAILED%"));
    }

    #[test]
    fn test_launcher_checks_environment_and_entry() {
        let launcher = render(&config(ScriptFlavor::Posix, "/srv/aed")).launcher;
        let env_check = launcher.find("Virtual environment not found").unwrap();
        let entry_check = launcher.find("StartMasksDetection.py not found").unwrap();
        let run = launcher.find("if python \"StartMasksDetection.py\"").unwrap();
        assert!(env_check < run && entry_check < run);
        assert!(launcher.contains("Failed to activate virtual environment"));
        assert!(launcher.contains("Python script execution failed"));
        assert!(!launcher.contains('@'));
    }

    #[test]
    fn test_entry_substitutes_root_with_forward_slashes() {
        let entry = render(&config(ScriptFlavor::Batch, r"C:\AED\root")).entry;
        assert!(entry.contains(r#"ROOT_DIR = os.path.abspath("C:/AED/root")"#));
        assert!(entry.contains(r#"os.path.join(ROOT_DIR, "images")"#));
        assert!(entry.contains("NO IMAGES FOUND"));
        assert!(!entry.contains("@ROOT@"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let config = config(ScriptFlavor::Posix, "/srv/aed");
        assert_eq!(render(&config), render(&config));
    }

    #[test]
    fn test_materialize_overwrites_and_creates_images() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(ScriptFlavor::Posix, dir.path().to_str().unwrap());
        std::fs::write(config.setup_script_path(), "stale").unwrap();

        let written = materialize(&config).unwrap();
        assert_eq!(written.len(), 3);
        assert!(config.images_path().is_dir());
        let setup = std::fs::read_to_string(config.setup_script_path()).unwrap();
        assert_eq!(setup, render(&config).setup);

        // Second run is identical.
        materialize(&config).unwrap();
        let again = std::fs::read_to_string(config.setup_script_path()).unwrap();
        assert_eq!(setup, again);
    }
}
