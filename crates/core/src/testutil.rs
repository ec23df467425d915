//! Shared test fixture: a tempdir-backed store, file store, case
//! directory, mock provider, and fully wired orchestrator.

use crate::cabinet::CabinetCaptureFlow;
use crate::cases::{CaseDirectory, CaseRecord, ContactDetails, FileCaseDirectory};
use crate::config::SignConfig;
use crate::model::{ArtifactKind, DocumentKind};
use crate::notify::{RecordingNotifier, SignatureNotifier};
use crate::orchestrator::SignatureOrchestrator;
use crate::store::SignatureStore;
use crate::sweep::VerificationSweep;
use crate::webhook::WebhookReconciler;
use paraphe_files::FileStore;
use paraphe_provider::{MockProvider, SignatureProvider};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

pub struct Fixture {
    // Held so the tempdir outlives the stores built on it.
    _dir: TempDir,
    pub config: Arc<SignConfig>,
    pub store: Arc<SignatureStore>,
    pub files: Arc<FileStore>,
    pub provider: Arc<MockProvider>,
    pub cases: Arc<FileCaseDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub orchestrator: Arc<SignatureOrchestrator>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(None, None)
    }

    /// Fixture wired to a custom provider instead of the mock. The `provider`
    /// field still holds an unused mock in that case.
    pub fn with_provider(provider: Arc<dyn SignatureProvider>) -> Self {
        Self::build(Some(provider), None)
    }

    pub fn with_config(tweak: impl FnOnce(SignConfig) -> SignConfig + 'static) -> Self {
        Self::build(None, Some(Box::new(tweak)))
    }

    fn build(
        custom: Option<Arc<dyn SignatureProvider>>,
        tweak: Option<Box<dyn FnOnce(SignConfig) -> SignConfig>>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = SignConfig::new(dir.path().to_path_buf()).unwrap();
        if let Some(tweak) = tweak {
            config = tweak(config);
        }
        let config = Arc::new(config);

        let files = Arc::new(FileStore::new(&config.blobs_dir()).unwrap());
        let store = Arc::new(SignatureStore::new(config.clone()));
        let provider = Arc::new(MockProvider::new());
        let provider_dyn: Arc<dyn SignatureProvider> = match custom {
            Some(custom) => custom,
            None => provider.clone(),
        };
        let cases = Arc::new(FileCaseDirectory::new(&config));
        let notifier = Arc::new(RecordingNotifier::new());
        let orchestrator = Arc::new(SignatureOrchestrator::new(
            store.clone(),
            files.clone(),
            provider_dyn,
            cases.clone() as Arc<dyn CaseDirectory>,
            notifier.clone() as Arc<dyn SignatureNotifier>,
        ));

        Self {
            _dir: dir,
            config,
            store,
            files,
            provider,
            cases,
            notifier,
            orchestrator,
        }
    }

    pub fn cabinet(&self) -> CabinetCaptureFlow {
        CabinetCaptureFlow::new(
            self.config.clone(),
            self.store.clone(),
            self.files.clone(),
            self.cases.clone() as Arc<dyn CaseDirectory>,
            self.orchestrator.clone(),
        )
    }

    pub fn reconciler(&self) -> WebhookReconciler {
        WebhookReconciler::new(self.store.clone(), self.orchestrator.clone())
    }

    pub fn sweep(&self) -> VerificationSweep {
        VerificationSweep::new(self.store.clone(), self.files.clone(), self.config.clone())
    }

    /// Seeds a case with both parents reachable and a rendered base
    /// document for each requested kind.
    pub fn seed_case(&self, kinds: &[DocumentKind]) -> CaseRecord {
        let mut rendered_documents = BTreeMap::new();
        for kind in kinds {
            let base = paraphe_pdf::render_report(
                kind.title(),
                &["Rendered legal document body".to_string()],
            )
            .unwrap();
            let id = self
                .files
                .save(&ArtifactKind::Base.category(*kind), "base.pdf", &base)
                .unwrap();
            rendered_documents.insert(kind.code().to_string(), id);
        }

        let case = CaseRecord {
            id: Uuid::new_v4(),
            child_label: "Case Dupont".to_string(),
            parent1: ContactDetails {
                first_name: "Jeanne".to_string(),
                last_name: "Martin".to_string(),
                email: Some("jeanne@example.org".to_string()),
                phone: Some("+33600000001".to_string()),
            },
            parent2: ContactDetails {
                first_name: "Paul".to_string(),
                last_name: "Martin".to_string(),
                email: Some("paul@example.org".to_string()),
                phone: Some("+33600000002".to_string()),
            },
            rendered_documents,
        };
        self.cases.put(&case).unwrap();
        case
    }

    pub fn seed_unreachable_case(&self) -> CaseRecord {
        let case = CaseRecord {
            id: Uuid::new_v4(),
            child_label: "Case Durand".to_string(),
            parent1: ContactDetails {
                first_name: "A".to_string(),
                last_name: "Durand".to_string(),
                email: None,
                phone: None,
            },
            parent2: ContactDetails {
                first_name: "B".to_string(),
                last_name: "Durand".to_string(),
                email: None,
                phone: None,
            },
            rendered_documents: BTreeMap::new(),
        };
        self.cases.put(&case).unwrap();
        case
    }

    /// A small valid PNG for cabinet upload tests.
    pub fn signature_png() -> Vec<u8> {
        let mut bytes = Vec::new();
        image::RgbImage::from_pixel(12, 6, image::Rgb([20u8, 20, 120]))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();
        bytes
    }
}
