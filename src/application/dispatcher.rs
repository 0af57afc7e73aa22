//! Decryption dispatcher: routes a released artifact to the decode routine
//! matching its declared content type.
//!
//! The mapping is a closed match. Content types outside it are rejected with
//! `UnsupportedContentType`; no ciphertext is ever decoded with a guessed
//! routine.

use crate::domain::{
    ArtifactDescriptor, ContentType, CryptoError, DecryptedArtifact, JobHandle, NumericTable,
    ReleasedArtifact, StatisticRecord, StatisticsSummary, StringTable,
};
use crate::ports::{CryptoEngine, CryptoEngineHandle};
use crate::{CipherflowError, Result};

use super::negotiator::EphemeralKeyPair;

/// Decode routine a content type is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeRoutine {
    /// Ciphertext to row-major float table with declared column labels
    NumericTable,
    /// Ciphertext to JSON list of per-variable statistic records
    Statistics,
}

impl DecodeRoutine {
    #[must_use]
    pub fn for_content_type(content_type: &ContentType) -> Option<Self> {
        match content_type {
            ContentType::FloatMatrix | ContentType::StringMatrix => Some(Self::NumericTable),
            ContentType::Statistics => Some(Self::Statistics),
            ContentType::Encrypted | ContentType::Prediction | ContentType::Unknown(_) => None,
        }
    }
}

pub(super) fn unsupported(job: &JobHandle, descriptor: &ArtifactDescriptor) -> CipherflowError {
    CipherflowError::UnsupportedContentType {
        job: job.id.clone(),
        result: descriptor.reference.to_string(),
        content_type: descriptor.content_type.clone(),
    }
}

fn decode_error(
    job: &JobHandle,
    descriptor: &ArtifactDescriptor,
    message: impl Into<String>,
) -> CipherflowError {
    CipherflowError::Decode {
        job: job.id.clone(),
        result: descriptor.reference.to_string(),
        message: message.into(),
    }
}

/// Pair the declared column labels with rows of `width` cells.
///
/// Without declared labels, columns are numbered from 0.
fn column_labels<T>(
    job: &JobHandle,
    descriptor: &ArtifactDescriptor,
    rows: &[Vec<T>],
) -> Result<Vec<String>> {
    let width = rows.first().map_or(descriptor.columns.len(), Vec::len);
    if let Some(i) = rows.iter().position(|r| r.len() != width) {
        return Err(decode_error(
            job,
            descriptor,
            format!("row {i} has {} cells, expected {width}", rows[i].len()),
        ));
    }

    if descriptor.columns.is_empty() {
        return Ok((0..width).map(|i| i.to_string()).collect());
    }
    if descriptor.columns.len() != width {
        return Err(decode_error(
            job,
            descriptor,
            format!(
                "{} columns declared but rows have {width} cells",
                descriptor.columns.len()
            ),
        ));
    }
    Ok(descriptor.columns.clone())
}

fn numeric_table(
    job: &JobHandle,
    descriptor: &ArtifactDescriptor,
    rows: Vec<Vec<f64>>,
) -> Result<NumericTable> {
    Ok(NumericTable {
        columns: column_labels(job, descriptor, &rows)?,
        rows,
        metadata: descriptor.metadata(),
    })
}

fn statistics_summary(
    job: &JobHandle,
    descriptor: &ArtifactDescriptor,
    json: &[u8],
) -> Result<StatisticsSummary> {
    let mut records: Vec<StatisticRecord> = serde_json::from_slice(json)
        .map_err(|e| decode_error(job, descriptor, format!("invalid statistics payload: {e}")))?;

    for record in &mut records {
        if record.std_dev.is_none() {
            record.std_dev = record.variance.filter(|v| *v >= 0.0).map(f64::sqrt);
        }
    }

    Ok(StatisticsSummary {
        records,
        raw_values: None,
        metadata: descriptor.metadata(),
    })
}

pub struct DecryptionDispatcher<E: CryptoEngine + ?Sized> {
    engine: CryptoEngineHandle<E>,
}

impl<E: CryptoEngine + ?Sized> DecryptionDispatcher<E> {
    pub fn new(engine: CryptoEngineHandle<E>) -> Self {
        Self { engine }
    }

    /// Decrypt a key-switched artifact with the matching ephemeral key.
    ///
    /// Column labels and display metadata come from `descriptor`, since they
    /// are not part of the ciphertext.
    ///
    /// # Errors
    /// - `UnsupportedContentType` if the declared type has no decode routine
    ///   (the engine is not called)
    /// - `Crypto` if the engine fails to decrypt
    /// - `Decode` if the decrypted payload does not match the declared shape
    pub fn decrypt(
        &self,
        job: &JobHandle,
        descriptor: &ArtifactDescriptor,
        artifact: &ReleasedArtifact,
        keys: &EphemeralKeyPair<'_, E>,
    ) -> Result<DecryptedArtifact> {
        let routine = DecodeRoutine::for_content_type(&descriptor.content_type)
            .ok_or_else(|| unsupported(job, descriptor))?;
        let crypto_error = |e: CryptoError| CipherflowError::Crypto {
            job: job.id.clone(),
            result: descriptor.reference.to_string(),
            source: e,
        };

        tracing::debug!(
            "Decrypting result {} as {} via {:?}",
            descriptor.reference,
            descriptor.content_type,
            routine
        );

        match routine {
            DecodeRoutine::NumericTable => {
                let rows = self
                    .engine
                    .decrypt_numeric_table(keys.context(), &artifact.ciphertext)
                    .map_err(crypto_error)?;
                Ok(DecryptedArtifact::NumericMatrix(numeric_table(job, descriptor, rows)?))
            }
            DecodeRoutine::Statistics => {
                let json = self
                    .engine
                    .decrypt_statistics(keys.context(), &artifact.ciphertext)
                    .map_err(crypto_error)?;
                Ok(DecryptedArtifact::Statistics(statistics_summary(
                    job,
                    descriptor,
                    json.as_bytes(),
                )?))
            }
        }
    }
}

/// Decode the payload of an artifact that was never encrypted.
///
/// Payloads are JSON: a list of rows for matrices, a list of records for
/// statistics. The engine is not involved.
///
/// # Errors
/// - `UnsupportedContentType` if the declared type has no decode routine
/// - `Decode` if the payload does not match the declared shape
pub fn decode_plaintext(
    job: &JobHandle,
    descriptor: &ArtifactDescriptor,
    payload: &[u8],
) -> Result<DecryptedArtifact> {
    tracing::debug!(
        "Decoding plaintext result {} as {}",
        descriptor.reference,
        descriptor.content_type
    );

    match &descriptor.content_type {
        ContentType::FloatMatrix => {
            let rows: Vec<Vec<f64>> = serde_json::from_slice(payload)
                .map_err(|e| decode_error(job, descriptor, format!("invalid float matrix: {e}")))?;
            Ok(DecryptedArtifact::NumericMatrix(numeric_table(job, descriptor, rows)?))
        }
        ContentType::StringMatrix => {
            let rows: Vec<Vec<String>> = serde_json::from_slice(payload)
                .map_err(|e| decode_error(job, descriptor, format!("invalid string matrix: {e}")))?;
            Ok(DecryptedArtifact::StringMatrix(StringTable {
                columns: column_labels(job, descriptor, &rows)?,
                rows,
                metadata: descriptor.metadata(),
            }))
        }
        ContentType::Statistics => Ok(DecryptedArtifact::Statistics(statistics_summary(
            job, descriptor, payload,
        )?)),
        ContentType::Encrypted | ContentType::Prediction | ContentType::Unknown(_) => {
            Err(unsupported(job, descriptor))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NoiseMetadata, ResultReference};
    use crate::test_support::RecordingEngine;
    use std::sync::Arc;

    fn descriptor(content_type: ContentType) -> ArtifactDescriptor {
        ArtifactDescriptor::new(ResultReference::new("r1"), content_type)
            .encrypted_with("cGFyYW1z")
    }

    fn job() -> JobHandle {
        JobHandle::new("job-7")
    }

    fn released() -> ReleasedArtifact {
        ReleasedArtifact::new(ContentType::Encrypted, vec![1, 2, 3, 4])
    }

    #[test]
    fn test_supported_types_use_expected_routine() {
        let cases = [
            (ContentType::FloatMatrix, DecodeRoutine::NumericTable),
            (ContentType::StringMatrix, DecodeRoutine::NumericTable),
            (ContentType::Statistics, DecodeRoutine::Statistics),
        ];

        for (content_type, routine) in cases {
            let engine = Arc::new(RecordingEngine::new());
            let dispatcher = DecryptionDispatcher::new(CryptoEngineHandle::new(Arc::clone(&engine)));
            let d = descriptor(content_type.clone());
            let keys = EphemeralKeyPair::generate(&*engine, "cGFyYW1z", &d.reference).unwrap();

            let out = dispatcher.decrypt(&job(), &d, &released(), &keys).expect("decrypt");

            match routine {
                DecodeRoutine::NumericTable => {
                    assert_eq!(engine.numeric_decrypts(), 1, "{content_type}");
                    assert_eq!(engine.statistics_decrypts(), 0, "{content_type}");
                    assert!(matches!(out, DecryptedArtifact::NumericMatrix(_)));
                }
                DecodeRoutine::Statistics => {
                    assert_eq!(engine.statistics_decrypts(), 1);
                    assert_eq!(engine.numeric_decrypts(), 0);
                    assert!(matches!(out, DecryptedArtifact::Statistics(_)));
                }
            }
        }
    }

    #[test]
    fn test_unsupported_types_invoke_no_routine() {
        for content_type in [
            ContentType::Encrypted,
            ContentType::Prediction,
            ContentType::Unknown("histogram".into()),
        ] {
            let engine = Arc::new(RecordingEngine::new());
            let dispatcher = DecryptionDispatcher::new(CryptoEngineHandle::new(Arc::clone(&engine)));
            let d = descriptor(content_type.clone());
            let keys = EphemeralKeyPair::generate(&*engine, "cGFyYW1z", &d.reference).unwrap();

            let err = dispatcher.decrypt(&job(), &d, &released(), &keys).unwrap_err();

            assert!(
                matches!(err, CipherflowError::UnsupportedContentType { content_type: ref ct, .. } if *ct == content_type)
            );
            assert_eq!(engine.numeric_decrypts(), 0);
            assert_eq!(engine.statistics_decrypts(), 0);
        }
    }

    #[test]
    fn test_metadata_reattached_after_decrypt() {
        let engine = Arc::new(RecordingEngine::new());
        engine.set_numeric_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let dispatcher = DecryptionDispatcher::new(CryptoEngineHandle::new(Arc::clone(&engine)));

        let mut d = descriptor(ContentType::FloatMatrix)
            .with_columns(vec!["count".into(), "sum".into()])
            .with_noise(vec![NoiseMetadata {
                variable: "count".into(),
                scale: 2.0,
                sensitivity: 1.0,
            }]);
        d.title = Some("Cohort totals".into());
        let keys = EphemeralKeyPair::generate(&*engine, "cGFyYW1z", &d.reference).unwrap();

        let out = dispatcher.decrypt(&job(), &d, &released(), &keys).expect("decrypt");
        let DecryptedArtifact::NumericMatrix(table) = out else {
            panic!("expected numeric matrix");
        };
        assert_eq!(table.columns, vec!["count", "sum"]);
        assert_eq!(table.rows[1], vec![3.0, 4.0]);
        assert_eq!(table.metadata.title.as_deref(), Some("Cohort totals"));
        assert_eq!(table.metadata.noise.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_column_count_mismatch_rejected() {
        let engine = Arc::new(RecordingEngine::new());
        engine.set_numeric_rows(vec![vec![1.0, 2.0, 3.0]]);
        let dispatcher = DecryptionDispatcher::new(CryptoEngineHandle::new(Arc::clone(&engine)));
        let d = descriptor(ContentType::FloatMatrix).with_columns(vec!["a".into(), "b".into()]);
        let keys = EphemeralKeyPair::generate(&*engine, "cGFyYW1z", &d.reference).unwrap();

        let err = dispatcher.decrypt(&job(), &d, &released(), &keys).unwrap_err();
        assert!(matches!(err, CipherflowError::Decode { .. }));
    }

    #[test]
    fn test_statistics_records_parsed() {
        let engine = Arc::new(RecordingEngine::new());
        engine.set_statistics_json(
            r#"[{"name":"age stats","variable":"age","mean":41.5,"variance":4.0,"count":120}]"#,
        );
        let dispatcher = DecryptionDispatcher::new(CryptoEngineHandle::new(Arc::clone(&engine)));
        let d = descriptor(ContentType::Statistics);
        let keys = EphemeralKeyPair::generate(&*engine, "cGFyYW1z", &d.reference).unwrap();

        let out = dispatcher.decrypt(&job(), &d, &released(), &keys).expect("decrypt");
        let DecryptedArtifact::Statistics(summary) = out else {
            panic!("expected statistics");
        };
        let record = &summary.records[0];
        assert_eq!(record.variable, "age");
        assert_eq!(record.mean, Some(41.5));
        assert_eq!(record.std_dev, Some(2.0));
        assert_eq!(record.count, Some(120.0));
    }

    #[test]
    fn test_engine_failure_surfaces_as_crypto_error() {
        let engine = Arc::new(RecordingEngine::new());
        engine.fail_decryption();
        let dispatcher = DecryptionDispatcher::new(CryptoEngineHandle::new(Arc::clone(&engine)));
        let d = descriptor(ContentType::FloatMatrix);
        let keys = EphemeralKeyPair::generate(&*engine, "cGFyYW1z", &d.reference).unwrap();

        let err = dispatcher.decrypt(&job(), &d, &released(), &keys).unwrap_err();
        match err {
            CipherflowError::Crypto { job, result, .. } => {
                assert_eq!(job, "job-7");
                assert_eq!(result, "r1");
            }
            other => panic!("expected crypto error, got {other:?}"),
        }
    }

    #[test]
    fn test_plaintext_statistics_decoded_without_engine() {
        let d = ArtifactDescriptor::new(ResultReference::new("r9"), ContentType::Statistics);
        let out = decode_plaintext(
            &job(),
            &d,
            br#"[{"name":"bmi","variable":"bmi","mean":24.1}]"#,
        )
        .expect("decode");

        let DecryptedArtifact::Statistics(summary) = out else {
            panic!("expected statistics");
        };
        assert_eq!(summary.records[0].mean, Some(24.1));
        assert!(summary.raw_values.is_none());
    }

    #[test]
    fn test_plaintext_string_matrix_numbered_columns() {
        let d = ArtifactDescriptor::new(ResultReference::new("r2"), ContentType::StringMatrix);
        let out = decode_plaintext(
            &job(),
            &d,
            br#"[["a","b"],["c","d"]]"#,
        )
        .expect("decode");

        let DecryptedArtifact::StringMatrix(table) = out else {
            panic!("expected string matrix");
        };
        assert_eq!(table.columns, vec!["0", "1"]);
    }

    #[test]
    fn test_plaintext_unsupported_type_rejected() {
        let d = ArtifactDescriptor::new(ResultReference::new("r3"), ContentType::Prediction);
        let err = decode_plaintext(&job(), &d, b"{}").unwrap_err();
        assert!(matches!(err, CipherflowError::UnsupportedContentType { .. }));
    }
}
