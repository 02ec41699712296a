//! Declared shapes for exported records.

use thiserror::Error;
use url::Url;

use crate::{JobRecord, ProfileRecord, ScanExport};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{record}: required field `{field}` is missing")]
    MissingField {
        record: &'static str,
        field: &'static str,
    },
    #[error("{record}: field `{field}` is not an absolute http(s) URL: {value:?}")]
    MalformedUrl {
        record: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("job #{index}: {source}")]
    Job {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },
}

fn require_http_url(record: &'static str, field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::MissingField { record, field });
    }
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
        _ => Err(ValidationError::MalformedUrl {
            record,
            field,
            value: value.to_string(),
        }),
    }
}

impl JobRecord {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_http_url("job", "link", &self.link)
    }
}

impl ProfileRecord {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.account.trim().is_empty() {
            return Err(ValidationError::MissingField {
                record: "profile",
                field: "account",
            });
        }
        if !self.picture_url.is_empty() {
            require_http_url("profile", "picture_url", &self.picture_url)?;
        }
        Ok(())
    }
}

impl ScanExport {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (index, job) in self.jobs.iter().enumerate() {
            job.validate().map_err(|source| ValidationError::Job {
                index,
                source: Box::new(source),
            })?;
        }
        if let Some(profile) = &self.profile {
            profile.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobDraft, ProfileDraft};

    fn job_with_link(link: &str) -> JobDraft {
        JobDraft {
            title: Some("Backgammon position analysis".into()),
            link: Some(link.into()),
            ..Default::default()
        }
    }

    #[test]
    fn absolute_links_validate() {
        assert!(job_with_link("https://www.upwork.com/jobs/~01bb2d").build().is_ok());
        assert!(job_with_link("http://example.com/y").build().is_ok());
    }

    #[test]
    fn relative_or_empty_links_are_rejected() {
        assert!(matches!(
            job_with_link("/jobs/abc").build(),
            Err(ValidationError::MalformedUrl { field: "link", .. })
        ));
        assert_eq!(
            JobDraft::default().build(),
            Err(ValidationError::MissingField {
                record: "job",
                field: "link"
            })
        );
        assert!(job_with_link("mailto:someone@example.com").build().is_err());
    }

    #[test]
    fn profile_requires_account() {
        let err = ProfileDraft::default().build().unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                record: "profile",
                field: "account"
            }
        );
    }

    #[test]
    fn profile_picture_must_be_a_url_when_present() {
        let mut draft = ProfileDraft::new("42");
        draft.identity.picture_url = "portrait.jpg".into();
        assert!(matches!(
            draft.build(),
            Err(ValidationError::MalformedUrl { field: "picture_url", .. })
        ));
    }

    #[test]
    fn export_reports_offending_job_index() {
        let export = ScanExport {
            jobs: vec![
                job_with_link("https://www.upwork.com/jobs/a").normalize(),
                job_with_link("/jobs/b").normalize(),
            ],
            profile: None,
        };
        match export.validate() {
            Err(ValidationError::Job { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
