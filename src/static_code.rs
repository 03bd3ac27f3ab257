// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Static validation of an already-signed code object.

This module re-derives the facts an embedded signature attests to (page
hashes, resource seal, requirement satisfaction) from the on-disk bytes and
compares them against what the signature actually says, independent of
whether the kernel or `codesign` would accept it. Results are cached on
first computation and invalidated together via [StaticCode::reset_validity].
*/

use {
    crate::{
        code_directory::CodeDirectoryBlob,
        code_hash::compute_code_hashes,
        code_requirement::{CodeRequirementExpression, EvaluationContext},
        code_resources::CodeResources,
        embedded_signature::{Blob, CodeSigningSlot, DigestType, EmbeddedSignature},
        error::AppleCodesignError,
        macho::get_macho_from_data,
    },
    apple_bundles::DirectoryBundle,
    log::{debug, warn},
    once_cell::sync::OnceCell,
    std::collections::BTreeMap,
    x509_certificate::CapturedX509Certificate,
};

/// The outcome of validating one aspect of a [StaticCode].
#[derive(Clone, Debug, PartialEq)]
pub enum ValidationResult {
    /// The aspect validated successfully.
    Valid,
    /// The aspect failed to validate, with a human readable reason.
    Invalid(String),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// A signed Mach-O together with the facts needed to statically validate it.
///
/// This is the static (non-dynamic/non-host) half of code signing validation:
/// it never consults the running kernel's notion of trust, only the bytes of
/// the binary and its embedded signature.
pub struct StaticCode<'a> {
    data: &'a [u8],
    universal_index: usize,
    certificates: Vec<CapturedX509Certificate>,
    directory_result: OnceCell<ValidationResult>,
    executable_result: OnceCell<ValidationResult>,
    resources_result: OnceCell<ValidationResult>,
    requirement_results: std::sync::Mutex<BTreeMap<String, ValidationResult>>,
}

impl<'a> StaticCode<'a> {
    /// Construct an instance from the raw bytes of a Mach-O or universal Mach-O file.
    pub fn from_macho_data(
        data: &'a [u8],
        universal_index: usize,
    ) -> Result<Self, AppleCodesignError> {
        let macho = get_macho_from_data(data, universal_index)?;

        let certificates = if let Some(signature) = macho.code_signature()? {
            if let Some(signed_data) = signature.signed_data()? {
                signed_data.certificates().cloned().collect()
            } else {
                vec![]
            }
        } else {
            vec![]
        };

        Ok(Self {
            data,
            universal_index,
            certificates,
            directory_result: OnceCell::new(),
            executable_result: OnceCell::new(),
            resources_result: OnceCell::new(),
            requirement_results: std::sync::Mutex::new(BTreeMap::new()),
        })
    }

    fn embedded_signature(&self) -> Result<Option<EmbeddedSignature>, AppleCodesignError> {
        let macho = get_macho_from_data(self.data, self.universal_index)?;
        macho.code_signature()
    }

    fn code_directory(&self) -> Result<Option<Box<CodeDirectoryBlob>>, AppleCodesignError> {
        match self.embedded_signature()? {
            Some(sig) => sig.code_directory(),
            None => Ok(None),
        }
    }

    /// Validate the CMS signature over the embedded CodeDirectory.
    ///
    /// Corresponds to `validateDirectory`: this is the cryptographic check that
    /// whoever holds the signer's private key actually vouched for the
    /// CodeDirectory blob that's embedded in the file, independent of whether
    /// that CodeDirectory's page hashes still match the bytes on disk.
    pub fn validate_directory(&self) -> &ValidationResult {
        self.directory_result.get_or_init(|| {
            let signature = match self.embedded_signature() {
                Ok(Some(sig)) => sig,
                Ok(None) => {
                    return ValidationResult::Invalid("no embedded signature present".into());
                }
                Err(e) => return ValidationResult::Invalid(format!("{}", e)),
            };

            let signed_data = match signature.signed_data() {
                Ok(Some(signed_data)) => signed_data,
                Ok(None) => {
                    return ValidationResult::Invalid("no CMS signature present".into());
                }
                Err(e) => return ValidationResult::Invalid(format!("{}", e)),
            };

            let mut signer_count = 0;

            for signer in signed_data.signers() {
                signer_count += 1;

                if let Err(e) = signer.verify_signature_with_signed_data(&signed_data) {
                    return ValidationResult::Invalid(format!(
                        "CMS signature verification failed: {}",
                        e
                    ));
                }
            }

            if signer_count == 0 {
                return ValidationResult::Invalid("CMS signature contains no signers".into());
            }

            debug!("CMS signature verified against {} signer(s)", signer_count);

            ValidationResult::Valid
        })
    }

    /// Validate that the CodeDirectory's page hashes match the actual file content.
    ///
    /// Corresponds to `validateExecutable`: re-derive every code-page digest and
    /// every special slot digest from the bytes on disk and compare them against
    /// what the CodeDirectory records.
    pub fn validate_executable(&self) -> &ValidationResult {
        self.executable_result.get_or_init(|| {
            let macho = match get_macho_from_data(self.data, self.universal_index) {
                Ok(macho) => macho,
                Err(e) => return ValidationResult::Invalid(format!("{}", e)),
            };

            let signature = match self.embedded_signature() {
                Ok(Some(sig)) => sig,
                Ok(None) => {
                    return ValidationResult::Invalid("no embedded signature present".into());
                }
                Err(e) => return ValidationResult::Invalid(format!("{}", e)),
            };

            let cd = match self.code_directory() {
                Ok(Some(cd)) => cd,
                Ok(None) => {
                    return ValidationResult::Invalid("no CodeDirectory present".into());
                }
                Err(e) => return ValidationResult::Invalid(format!("{}", e)),
            };

            if !matches!(cd.hash_type, DigestType::Sha256 | DigestType::Sha384) {
                return ValidationResult::Invalid(format!(
                    "CodeDirectory uses a weak or unsupported digest type: {:?}",
                    cd.hash_type
                ));
            }

            let actual = match compute_code_hashes(&macho, cd.hash_type, Some(cd.page_size as usize))
            {
                Ok(hashes) => hashes,
                Err(e) => return ValidationResult::Invalid(format!("{}", e)),
            };

            if actual.len() != cd.code_hashes.len() {
                return ValidationResult::Invalid(format!(
                    "page hash count mismatch: expected {}, computed {}",
                    cd.code_hashes.len(),
                    actual.len()
                ));
            }

            for (i, (expected, computed)) in cd.code_hashes.iter().zip(actual.iter()).enumerate() {
                if expected.data.as_ref() != computed.as_slice() {
                    return ValidationResult::Invalid(format!("page hash mismatch at index {}", i));
                }
            }

            for blob in &signature.blobs {
                let slot = blob.slot;

                if u32::from(slot) < 32
                    && slot != CodeSigningSlot::CodeDirectory
                    && !cd.special_hashes.contains_key(&slot)
                {
                    return ValidationResult::Invalid(format!(
                        "special slot {:?} is present but has no CodeDirectory digest",
                        slot
                    ));
                }
            }

            for (slot, expected) in cd.special_hashes.iter() {
                let entry = match signature.find_slot(*slot) {
                    Some(entry) => entry,
                    None => {
                        return ValidationResult::Invalid(format!(
                            "CodeDirectory records a digest for slot {:?} that isn't present",
                            slot
                        ));
                    }
                };

                let actual = match entry.digest_with(cd.hash_type) {
                    Ok(digest) => digest,
                    Err(e) => return ValidationResult::Invalid(format!("{}", e)),
                };

                if actual != expected.to_vec() {
                    return ValidationResult::Invalid(format!(
                        "special slot {:?} digest mismatch",
                        slot
                    ));
                }
            }

            debug!("all {} page hashes and special slot hashes match", actual.len());

            ValidationResult::Valid
        })
    }

    /// Validate the sealed resources dictionary against the actual bundle contents.
    ///
    /// Corresponds to `validateResources`: re-walk `bundle`'s files and compare them
    /// against `resources`, the parsed `_CodeSignature/CodeResources` manifest sealed
    /// into it. A bare Mach-O file has no resource directory to seal, so callers
    /// pass `None` and this trivially validates.
    pub fn validate_resources(
        &self,
        sealed: Option<(&CodeResources, &DirectoryBundle)>,
    ) -> &ValidationResult {
        self.resources_result.get_or_init(|| {
            let (resources, bundle) = match sealed {
                Some(pair) => pair,
                None => return ValidationResult::Valid,
            };

            let problems = match resources.validate_against_bundle(bundle) {
                Ok(problems) => problems,
                Err(e) => return ValidationResult::Invalid(format!("{}", e)),
            };

            if problems.is_empty() {
                debug!("all sealed resources matched bundle contents");
                ValidationResult::Valid
            } else {
                let detail = problems
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");

                ValidationResult::Invalid(detail)
            }
        })
    }

    /// Evaluate a [CodeRequirementExpression] against this code's signing identity.
    ///
    /// Results are memoized per requirement text so repeated policy checks (e.g. a
    /// designated requirement re-evaluated by multiple callers) are cheap.
    pub fn validate_requirement(
        &self,
        label: &str,
        requirement: &CodeRequirementExpression,
        identifier: &str,
    ) -> ValidationResult {
        let mut cache = self.requirement_results.lock().unwrap();

        if let Some(result) = cache.get(label) {
            return result.clone();
        }

        let cd = match self.code_directory() {
            Ok(Some(cd)) => cd,
            Ok(None) => {
                let result = ValidationResult::Invalid("no CodeDirectory present".into());
                cache.insert(label.to_string(), result.clone());
                return result;
            }
            Err(e) => {
                let result = ValidationResult::Invalid(format!("{}", e));
                cache.insert(label.to_string(), result.clone());
                return result;
            }
        };

        let cd_hash = match cd.digest_with(cd.hash_type) {
            Ok(hash) => hash,
            Err(e) => {
                let result = ValidationResult::Invalid(format!("{}", e));
                cache.insert(label.to_string(), result.clone());
                return result;
            }
        };

        let ctx = EvaluationContext {
            identifier,
            certificates: &self.certificates,
            code_directory_hash: &cd_hash,
            info_plist: None,
            entitlements: None,
        };

        let result = if requirement.evaluate(&ctx) {
            ValidationResult::Valid
        } else {
            warn!("requirement '{}' did not evaluate to true", label);
            ValidationResult::Invalid(format!("requirement '{}' not satisfied", label))
        };

        cache.insert(label.to_string(), result.clone());
        result
    }

    /// Reset all memoized validation results.
    ///
    /// Required after anything that could change what this [StaticCode] digests
    /// (e.g. the underlying file was rewritten in place).
    pub fn reset_validity(&mut self) {
        self.directory_result = OnceCell::new();
        self.executable_result = OnceCell::new();
        self.resources_result = OnceCell::new();
        self.requirement_results.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validation_result_is_valid() {
        assert!(ValidationResult::Valid.is_valid());
        assert!(!ValidationResult::Invalid("x".into()).is_valid());
    }
}
