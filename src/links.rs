use crate::cache::with_flush;
use crate::domain::Publication;
use crate::error::MibigError;
use crate::providers::doi::{DoiCache, DoiSource};
use crate::pubmed::{PubmedClient, resolve_missing};
use crate::references::PubmedCache;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceLink {
    pub category: String,
    pub url: String,
    pub title: String,
    pub info: Option<String>,
}

/// Links for every publication of an entry, in document order. Repeated
/// publications of the same category collapse into the first link.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCollection {
    links: Vec<(String, ReferenceLink)>,
}

impl ReferenceCollection {
    /// Builds the links and fills PubMed and DOI titles from the caches,
    /// fetching whatever is missing. Both caches are flushed afterwards.
    pub fn build<P, S>(
        publications: &[Publication],
        pubmed_cache: &mut PubmedCache,
        pubmed_client: &P,
        doi_cache: &mut DoiCache<S>,
    ) -> Result<Self, MibigError>
    where
        P: PubmedClient,
        S: DoiSource,
    {
        let mut collection = Self::default();
        let mut pmids = Vec::new();
        let mut dois = Vec::new();
        for publication in publications {
            match publication {
                Publication::Pubmed(pmid) if pmid.is_placeholder() => continue,
                Publication::Pubmed(pmid) => pmids.push(pmid.to_string()),
                Publication::Doi(doi) => dois.push(doi.to_string()),
                Publication::Patent(_) | Publication::Url(_) => {}
            }
            collection.insert(publication);
        }

        if !pmids.is_empty() {
            with_flush(pubmed_cache, |cache| {
                resolve_missing(cache, pubmed_client, &pmids)?;
                for pmid in &pmids {
                    let entry = cache.get(pmid)?;
                    collection.describe("pubmed", pmid, &entry.title, entry.info());
                }
                Ok(())
            })?;
        }
        if !dois.is_empty() {
            with_flush(doi_cache, |cache| {
                for doi in &dois {
                    let entry = cache.get(doi)?;
                    let (title, info) = (entry.title.clone(), entry.info());
                    collection.describe("doi", doi, &title, info);
                }
                Ok(())
            })?;
        }
        Ok(collection)
    }

    pub fn links(&self) -> impl Iterator<Item = &ReferenceLink> {
        self.links.iter().map(|(_, link)| link)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    fn insert(&mut self, publication: &Publication) {
        let (category, key) = (publication.category(), publication.content());
        if self.position(category, key).is_some() {
            return;
        }
        self.links.push((
            key.to_string(),
            ReferenceLink {
                category: category.to_string(),
                url: publication.link(),
                title: key.to_string(),
                info: None,
            },
        ));
    }

    fn position(&self, category: &str, key: &str) -> Option<usize> {
        self.links
            .iter()
            .position(|(existing, link)| existing == key && link.category == category)
    }

    fn describe(&mut self, category: &str, key: &str, title: &str, info: String) {
        if let Some(index) = self.position(category, key) {
            let link = &mut self.links[index].1;
            link.title = title.to_string();
            link.info = Some(info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Doi;
    use crate::providers::doi::CitationFormat;
    use crate::pubmed::PubmedArticle;

    struct StaticPubmed;

    impl PubmedClient for StaticPubmed {
        fn fetch_summaries(&self, pmids: &[String]) -> Result<Vec<PubmedArticle>, MibigError> {
            Ok(pmids
                .iter()
                .map(|pmid| PubmedArticle {
                    pmid: pmid.clone(),
                    title: format!("Article {pmid}"),
                    authors: vec!["Doe A".to_string()],
                    year: "2015".to_string(),
                    journal: "Cell".to_string(),
                })
                .collect())
        }
    }

    struct OfflineDoi;

    impl DoiSource for OfflineDoi {
        fn fetch(&self, _doi: &Doi, _format: CitationFormat) -> Result<Option<String>, MibigError> {
            Ok(None)
        }
    }

    #[test]
    fn same_content_in_other_categories_keeps_separate_links() {
        let publications: Vec<Publication> = ["pubmed:123", "patent:123", "pubmed:123", "url:123"]
            .iter()
            .map(|raw| raw.parse().unwrap())
            .collect();
        let mut pubmed_cache = PubmedCache::open(None).unwrap();
        let mut doi_cache = DoiCache::open(None, OfflineDoi).unwrap();

        let collection = ReferenceCollection::build(
            &publications,
            &mut pubmed_cache,
            &StaticPubmed,
            &mut doi_cache,
        )
        .unwrap();

        let links: Vec<&ReferenceLink> = collection.links().collect();
        let categories: Vec<&str> = links.iter().map(|link| link.category.as_str()).collect();
        assert_eq!(categories, vec!["pubmed", "patent", "url"]);
        assert_eq!(links[0].title, "Article 123.");
        assert!(links[0].info.is_some());
        assert_eq!(links[1].title, "123");
        assert!(links[1].info.is_none());
    }
}
