use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::classify::{Classifier, FALLBACK_CATEGORY};
use crate::db::Repository;
use crate::enrich::{Enricher, PlaceLookup};
use crate::session::{CandidateRecord, PageSink};

/// Running totals across every page of a run.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunTotals {
    pub saved: usize,
    pub skipped: usize,
}

/// Consumes page batches from the extraction session and runs each one
/// through dedup → enrichment → classification → persistence before the
/// session starts on the next page. A crash therefore loses at most the
/// page currently in flight.
pub struct PipelineCoordinator<L, C> {
    repo: Repository,
    enricher: Enricher<L>,
    classifier: Option<C>,
    totals: RunTotals,
}

impl<L: PlaceLookup, C: Classifier> PipelineCoordinator<L, C> {
    pub fn new(repo: Repository, enricher: Enricher<L>, classifier: Option<C>) -> Self {
        Self {
            repo,
            enricher,
            classifier,
            totals: RunTotals::default(),
        }
    }

    pub fn totals(&self) -> RunTotals {
        self.totals
    }
}

#[async_trait]
impl<L: PlaceLookup, C: Classifier> PageSink for PipelineCoordinator<L, C> {
    async fn on_page(&mut self, batch: Vec<CandidateRecord>) -> Result<()> {
        let page_size = batch.len();
        let fresh = self.repo.filter_new(batch)?;
        self.totals.skipped += page_size - fresh.len();
        info!(
            "dedup: {} new, {} already stored",
            fresh.len(),
            page_size - fresh.len()
        );
        if fresh.is_empty() {
            return Ok(());
        }

        let mut enriched = Vec::with_capacity(fresh.len());
        for record in fresh {
            let record = self.enricher.enrich(record).await;
            // A listing with no name or no dates at all is unusable.
            if record.name.is_empty()
                || (record.start_date.is_none() && record.end_date.is_none())
            {
                warn!("dropping incomplete record: {:?}", record.name);
                continue;
            }
            enriched.push(record);
        }
        if enriched.is_empty() {
            return Ok(());
        }

        let assignments: HashMap<String, Vec<String>> = match &self.classifier {
            Some(classifier) => match classifier.classify_batch(&enriched).await {
                Ok(map) => map,
                Err(e) => {
                    warn!("classification failed, tagging everything {}: {:#}", FALLBACK_CATEGORY, e);
                    HashMap::new()
                }
            },
            None => HashMap::new(),
        };
        for record in &mut enriched {
            record.categories = assignments
                .get(&record.name)
                .cloned()
                .filter(|tags| !tags.is_empty())
                .unwrap_or_else(|| vec![FALLBACK_CATEGORY.to_string()]);
        }

        let ids = self.repo.upsert(&enriched)?;
        self.totals.saved += ids.len();
        Ok(())
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Classifier;
    use crate::db::Repository;
    use crate::enrich::{EnrichedRecord, PlaceInfo};
    use crate::session::{ExtractionSession, SessionConfig};
    use crate::surface::mock::{ScriptedItem, ScriptedPage, ScriptedSurface};
    use std::time::Duration;

    struct StaticLookup;

    #[async_trait]
    impl PlaceLookup for StaticLookup {
        async fn lookup(&self, _name: &str) -> Result<Option<PlaceInfo>> {
            Ok(Some(PlaceInfo {
                link: "https://place.example".to_string(),
                mapx: "1270000000".to_string(),
                mapy: "375000000".to_string(),
            }))
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl Classifier for FailingClassifier {
        async fn classify_batch(
            &self,
            _records: &[EnrichedRecord],
        ) -> Result<HashMap<String, Vec<String>>> {
            Err(anyhow::anyhow!("model unavailable"))
        }
    }

    struct FixedClassifier(HashMap<String, Vec<String>>);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify_batch(
            &self,
            _records: &[EnrichedRecord],
        ) -> Result<HashMap<String, Vec<String>>> {
            Ok(self.0.clone())
        }
    }

    fn quick_config() -> SessionConfig {
        SessionConfig {
            scroll_settle: Duration::ZERO,
            detail_settle: Duration::ZERO,
            ..SessionConfig::default()
        }
    }

    fn seeded_repo(dup_name: &str) -> Repository {
        let mut repo = Repository::open_in_memory().unwrap();
        // Mirror exactly what the scripted surface will produce for this
        // item so the fingerprints agree.
        repo.upsert(&[EnrichedRecord {
            name: dup_name.to_string(),
            address: format!("{} road 1", dup_name),
            lat: 37.5,
            lon: 127.0,
            start_date: Some("24.03.01.".to_string()),
            end_date: Some("24.03.15.".to_string()),
            description: format!("{} pop-up", dup_name),
            site_link: String::new(),
            images: Vec::new(),
            categories: vec![FALLBACK_CATEGORY.to_string()],
        }])
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn two_pages_with_one_duplicate() {
        let surface = ScriptedSurface::new(vec![
            ScriptedPage {
                items: vec![
                    ScriptedItem::named("Dup", "24.03.01. ~ 24.03.15."),
                    ScriptedItem::named("New1", "24.03.01. ~ 24.03.15."),
                    ScriptedItem::named("New2", "24.03.01. ~ 24.03.15."),
                ],
            },
            ScriptedPage {
                items: vec![
                    ScriptedItem::named("New3", "24.04.01. ~ 24.04.15."),
                    ScriptedItem::named("New4", "24.04.01. ~ 24.04.15."),
                    ScriptedItem::named("New5", "24.04.01."),
                ],
            },
        ]);
        let mut pipeline = PipelineCoordinator::<_, FixedClassifier>::new(
            seeded_repo("Dup"),
            Enricher::new(StaticLookup).without_pause(),
            None,
        );

        let session = ExtractionSession::new(&surface, quick_config());
        let stats = session.run("popup", &mut pipeline).await.unwrap();
        assert_eq!(stats.total_count, 6);
        assert_eq!(stats.page_count, 2);

        let totals = pipeline.totals();
        assert_eq!(totals.saved, 5);
        assert_eq!(totals.skipped, 1);

        // The duplicate kept its single row; 5 new rows joined it.
        let store_stats = pipeline.repo.stats().unwrap();
        assert_eq!(store_stats.stores, 6);
    }

    #[tokio::test]
    async fn classification_failure_degrades_to_the_sentinel() {
        let surface = ScriptedSurface::new(vec![ScriptedPage {
            items: vec![
                ScriptedItem::named("Alpha", "24.03.01."),
                ScriptedItem::named("Beta", "24.03.01."),
            ],
        }]);
        let mut pipeline = PipelineCoordinator::new(
            Repository::open_in_memory().unwrap(),
            Enricher::new(StaticLookup).without_pause(),
            Some(FailingClassifier),
        );

        let session = ExtractionSession::new(&surface, quick_config());
        session.run("popup", &mut pipeline).await.unwrap();

        let stats = pipeline.repo.stats().unwrap();
        assert_eq!(stats.assignments, 2);
        let etc = stats
            .by_category
            .iter()
            .find(|(name, _)| name == FALLBACK_CATEGORY)
            .unwrap();
        assert_eq!(etc.1, 2);
    }

    #[tokio::test]
    async fn classifier_tags_are_applied_with_fallback_for_misses() {
        let surface = ScriptedSurface::new(vec![ScriptedPage {
            items: vec![
                ScriptedItem::named("Tagged", "24.03.01."),
                ScriptedItem::named("Untagged", "24.03.01."),
            ],
        }]);
        let mut map = HashMap::new();
        map.insert(
            "Tagged".to_string(),
            vec!["fashion".to_string(), "beauty".to_string()],
        );
        let mut pipeline = PipelineCoordinator::new(
            Repository::open_in_memory().unwrap(),
            Enricher::new(StaticLookup).without_pause(),
            Some(FixedClassifier(map)),
        );

        let session = ExtractionSession::new(&surface, quick_config());
        session.run("popup", &mut pipeline).await.unwrap();

        let stats = pipeline.repo.stats().unwrap();
        // Tagged: fashion + beauty; Untagged: etc.
        assert_eq!(stats.assignments, 3);
        let etc = stats
            .by_category
            .iter()
            .find(|(name, _)| name == FALLBACK_CATEGORY)
            .unwrap();
        assert_eq!(etc.1, 1);
    }

    #[tokio::test]
    async fn records_without_dates_are_dropped_not_saved() {
        let surface = ScriptedSurface::new(vec![ScriptedPage {
            items: vec![
                ScriptedItem::named("Dated", "24.03.01."),
                // No period at all: start and end both end up absent.
                ScriptedItem {
                    name: Some("Dateless".to_string()),
                    period: None,
                    ..ScriptedItem::default()
                },
            ],
        }]);
        let mut pipeline = PipelineCoordinator::<_, FixedClassifier>::new(
            Repository::open_in_memory().unwrap(),
            Enricher::new(StaticLookup).without_pause(),
            None,
        );

        let session = ExtractionSession::new(&surface, quick_config());
        session.run("popup", &mut pipeline).await.unwrap();

        let totals = pipeline.totals();
        assert_eq!(totals.saved, 1);
        assert_eq!(totals.skipped, 0);
        assert_eq!(pipeline.repo.stats().unwrap().stores, 1);
    }

    #[tokio::test]
    async fn all_duplicate_page_short_circuits() {
        let surface = ScriptedSurface::new(vec![ScriptedPage {
            items: vec![ScriptedItem::named("Dup", "24.03.01. ~ 24.03.15.")],
        }]);
        let mut pipeline = PipelineCoordinator::<_, FixedClassifier>::new(
            seeded_repo("Dup"),
            Enricher::new(StaticLookup).without_pause(),
            None,
        );

        let session = ExtractionSession::new(&surface, quick_config());
        session.run("popup", &mut pipeline).await.unwrap();

        let totals = pipeline.totals();
        assert_eq!(totals.saved, 0);
        assert_eq!(totals.skipped, 1);
    }
}
