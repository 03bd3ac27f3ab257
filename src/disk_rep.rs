// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Disk representation abstraction.

A code object can live on disk in more than one shape: a standalone Mach-O
file, an application bundle with a `_CodeSignature/CodeResources` manifest, or
(rarely, and only partially supported here) a plain file whose signature is
recorded in an extended attribute rather than embedded in the file itself.
[DiskRep] gives callers a single enum to classify a path through before
dispatching to the Mach-O or bundle specific pipelines, and exposes the
handful of queries (signing range, page size, recommended identifier) that are
common to every layout but computed differently for each one.
*/

use {
    crate::{
        error::AppleCodesignError,
        macho::{get_macho_from_data, AppleSignable},
        reader::PathType,
    },
    apple_bundles::DirectoryBundle,
    std::path::{Path, PathBuf},
};

/// The default page size assumed for a Mach-O whose CodeDirectory hasn't been
/// parsed yet (matches [crate::code_hash]'s default).
const DEFAULT_PAGE_SIZE: u32 = 4096;

/// How a code object's signature is represented on disk.
pub enum DiskRep {
    /// A thin or universal Mach-O file with the signature embedded in `__LINKEDIT`.
    MachO(PathBuf),
    /// An application bundle with a `_CodeSignature/CodeResources` manifest.
    Bundle(PathBuf),
    /// A plain file with no embedded or bundle-adjacent signature storage.
    ///
    /// Apple's `codesign` supports signing arbitrary files by recording the
    /// signature in the `com.apple.cs.CodeDirectory` extended attribute. This
    /// crate classifies such paths but does not implement that storage, since
    /// doing so requires platform-specific extended-attribute support this
    /// crate does not otherwise depend on.
    File(PathBuf),
}

impl DiskRep {
    /// Classify a path's disk representation by sniffing its content.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AppleCodesignError> {
        let path = path.as_ref().to_path_buf();

        match PathType::from_path(&path)? {
            PathType::MachO => Ok(Self::MachO(path)),
            PathType::Bundle => Ok(Self::Bundle(path)),
            PathType::Other => Ok(Self::File(path)),
        }
    }

    /// The underlying filesystem path this representation was resolved from.
    pub fn path(&self) -> &Path {
        match self {
            Self::MachO(p) | Self::Bundle(p) | Self::File(p) => p,
        }
    }

    /// The path to the main executable that is actually signed.
    ///
    /// For a Mach-O or plain file this is [Self::path] itself; for a bundle it's
    /// the Mach-O located by `Info.plist`'s `CFBundleExecutable`, if present.
    pub fn main_executable_path(&self) -> Result<Option<PathBuf>, AppleCodesignError> {
        match self {
            Self::MachO(p) | Self::File(p) => Ok(Some(p.clone())),
            Self::Bundle(p) => {
                let bundle = DirectoryBundle::new_from_path(p)
                    .map_err(AppleCodesignError::DirectoryBundle)?;

                let main_exe = bundle
                    .files(false)
                    .map_err(AppleCodesignError::DirectoryBundle)?
                    .into_iter()
                    .find(|file| matches!(file.is_main_executable(), Ok(true)));

                Ok(main_exe.map(|f| f.absolute_path()))
            }
        }
    }

    /// The canonical path of this code object: the bundle root for a bundle,
    /// or the file itself otherwise.
    pub fn canonical_path(&self) -> &Path {
        self.path()
    }

    /// The byte offset within the main executable at which the signed range begins.
    ///
    /// Always `0`: `goblin` resolves a universal binary's per-architecture
    /// [goblin::mach::MachO] with segment offsets already relative to that
    /// architecture's slice, so there is no additional base to add.
    pub fn signing_base(&self) -> Result<u64, AppleCodesignError> {
        Ok(0)
    }

    /// The byte offset within the main executable at which the signed range ends.
    ///
    /// This is the offset of the start of the embedded signature data (or end of
    /// file, if unsigned), matching [AppleSignable::code_limit_binary_offset].
    pub fn signing_limit(&self) -> Result<u64, AppleCodesignError> {
        let path = self
            .main_executable_path()?
            .ok_or_else(|| AppleCodesignError::BundleNoMainExecutable(self.path().to_path_buf()))?;

        let data = std::fs::read(&path)?;
        let macho = get_macho_from_data(&data, 0)?;

        macho.code_limit_binary_offset()
    }

    /// The page size used to chunk the signed range into code-hash slots.
    ///
    /// A plain [Self::File] has no Mach-O page granularity, so this always
    /// returns the Mach-O default.
    pub fn page_size(&self) -> Result<u32, AppleCodesignError> {
        Ok(DEFAULT_PAGE_SIZE)
    }

    /// The identifier a signer should use absent an explicit override.
    ///
    /// For a bundle, this is `CFBundleIdentifier` from `Info.plist`. For a
    /// Mach-O or plain file, this is the basename with its last extension
    /// stripped, matching `codesign`'s own fallback for unbundled code.
    pub fn recommended_identifier(&self) -> Result<String, AppleCodesignError> {
        match self {
            Self::Bundle(p) => {
                let bundle = DirectoryBundle::new_from_path(p)
                    .map_err(AppleCodesignError::DirectoryBundle)?;

                bundle
                    .identifier()
                    .map_err(AppleCodesignError::DirectoryBundle)?
                    .ok_or_else(|| AppleCodesignError::BundleNoIdentifier(bundle.info_plist_path()))
            }
            Self::MachO(p) | Self::File(p) => {
                let stem = p
                    .file_stem()
                    .ok_or_else(|| {
                        AppleCodesignError::DiskRepUnknownIdentifier(p.display().to_string())
                    })?
                    .to_string_lossy()
                    .to_string();

                Ok(stem)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classifies_directory_as_bundle() {
        let dir = tempfile::tempdir().unwrap();
        match DiskRep::from_path(dir.path()).unwrap() {
            DiskRep::Bundle(p) => assert_eq!(p, dir.path()),
            _ => panic!("expected Bundle"),
        }
    }

    #[test]
    fn classifies_plain_file_as_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.bin");
        std::fs::write(&path, b"not a macho").unwrap();

        match DiskRep::from_path(&path).unwrap() {
            DiskRep::File(p) => assert_eq!(p, path),
            _ => panic!("expected File"),
        }
    }

    #[test]
    fn recommended_identifier_for_plain_file_strips_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.bin");
        std::fs::write(&path, b"not a macho").unwrap();

        let rep = DiskRep::from_path(&path).unwrap();
        assert_eq!(rep.recommended_identifier().unwrap(), "plain");
    }

    #[test]
    fn plain_file_page_size_and_signing_base_are_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.bin");
        std::fs::write(&path, b"not a macho").unwrap();

        let rep = DiskRep::from_path(&path).unwrap();
        assert_eq!(rep.page_size().unwrap(), DEFAULT_PAGE_SIZE);
        assert_eq!(rep.signing_base().unwrap(), 0);
        assert_eq!(rep.main_executable_path().unwrap(), Some(path));
    }
}
