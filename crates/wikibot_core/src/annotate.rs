use chrono::Datelike;

use crate::lang::localize_template;
use crate::normalize::CanonicalUrl;
use crate::status::{InvalidReason, Verdict};
use crate::wikitext::{EditOp, Node, Template, Wikicode};

pub const BROKEN_LINK_TEMPLATE: &str = "Dead link";

/// Calendar date of the run, stamped once and reused for every marker the
/// run writes, so a single run never produces mixed dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl RunDate {
    pub fn today() -> Self {
        let now = chrono::Local::now().date_naive();
        Self {
            year: now.year(),
            month: now.month(),
            day: now.day(),
        }
    }

    pub fn params(&self) -> [String; 3] {
        [
            format!("{:02}", self.year),
            format!("{:02}", self.month),
            format!("{:02}", self.day),
        ]
    }
}

/// One external link occurrence, as collected from the page snapshot before
/// any classification happened.
#[derive(Debug, Clone)]
pub struct LinkSite {
    pub index: usize,
    pub url_part: String,
    pub rest: Option<String>,
    pub target: Option<CanonicalUrl>,
}

#[derive(Debug, Clone, Default)]
pub struct LinkAnnotation {
    pub ops: Vec<EditOp>,
    pub report_line: Option<String>,
}

pub fn annotate_link(
    code: &Wikicode,
    site: &LinkSite,
    verdict: Option<Verdict>,
    language: &str,
    date: &RunDate,
) -> LinkAnnotation {
    let mut annotation = LinkAnnotation::default();
    let Some(link) = code.get(site.index).and_then(Node::as_extlink) else {
        return annotation;
    };

    let split = site.rest.is_some();
    let mut rest_nodes = match site.rest.as_deref() {
        Some(rest) => Wikicode::parse(rest).nodes().to_vec(),
        None => Vec::new(),
    };

    // The candidate marker. After a split the remainder starts right behind
    // the link, so its leading template wins; otherwise it is the first
    // non-whitespace node following the link in the page.
    let rest_flag = rest_nodes
        .iter()
        .position(|node| !node.is_whitespace())
        .filter(|&pos| rest_nodes[pos].as_template().is_some_and(is_marker));
    let doc_flag = if split {
        None
    } else {
        find_doc_flag(code, site.index)
    };

    let mut new_flag = None::<Template>;
    match verdict {
        Some(Verdict::Valid) => {
            if let Some(pos) = rest_flag {
                rest_nodes.remove(pos);
            } else if let Some(doc_index) = doc_flag {
                annotation.ops.push(EditOp::Remove { index: doc_index });
            }
        }
        Some(Verdict::Invalid(reason)) => {
            let localized = localize_template(BROKEN_LINK_TEMPLATE, language);
            if let Some(pos) = rest_flag {
                let updated = rest_nodes[pos]
                    .as_template()
                    .map(|flag| refresh_flag(flag, &localized, reason, date));
                if let Some(updated) = updated {
                    rest_nodes[pos] = Node::Template(updated);
                }
            } else if let Some(doc_index) = doc_flag {
                if let Some(flag) = code.get(doc_index).and_then(Node::as_template) {
                    let updated = refresh_flag(flag, &localized, reason, date);
                    if updated != *flag {
                        annotation.ops.push(EditOp::Replace {
                            index: doc_index,
                            nodes: vec![Node::Template(updated)],
                        });
                    }
                }
            } else {
                new_flag = Some(build_flag(&localized, reason, date));
            }
            if let Some(target) = site.target.as_ref() {
                annotation.report_line = Some(format!("{target} ({reason})"));
            }
        }
        Some(Verdict::Indeterminate) => {
            log::warn!("leaving {} unflagged, status is indeterminate", site.url_part);
        }
        None => {}
    }

    if split {
        let mut updated = link.clone();
        updated.url = site.url_part.clone();
        let mut nodes = vec![Node::ExtLink(updated)];
        if let Some(flag) = new_flag {
            nodes.push(Node::Template(flag));
        }
        nodes.extend(rest_nodes);
        annotation.ops.push(EditOp::Replace {
            index: site.index,
            nodes,
        });
    } else if let Some(flag) = new_flag {
        annotation.ops.push(EditOp::Replace {
            index: site.index,
            nodes: vec![Node::ExtLink(link.clone()), Node::Template(flag)],
        });
    }

    annotation
}

fn is_marker(template: &Template) -> bool {
    template.name_starts_with(BROKEN_LINK_TEMPLATE)
}

fn find_doc_flag(code: &Wikicode, index: usize) -> Option<usize> {
    let adjacent = code.adjacent_index(index)?;
    code.get(adjacent)
        .and_then(Node::as_template)
        .filter(|template| is_marker(template))
        .map(|_| adjacent)
}

// An existing marker keeps its date fields as long as the recorded status
// still matches; the dates say when the failure was first seen.
fn refresh_flag(
    flag: &Template,
    localized: &str,
    reason: InvalidReason,
    date: &RunDate,
) -> Template {
    let mut updated = flag.clone();
    if !updated.name_matches(localized) {
        updated.set_name(localized);
    }
    let reason_text = reason.to_string();
    if updated.get("status") != Some(reason_text.as_str()) {
        updated.set("status", &reason_text);
        let [year, month, day] = date.params();
        updated.set("1", &year);
        updated.set("2", &month);
        updated.set("3", &day);
    }
    updated
}

fn build_flag(localized: &str, reason: InvalidReason, date: &RunDate) -> Template {
    let mut flag = Template::new(localized);
    let [year, month, day] = date.params();
    flag.set("1", &year);
    flag.set("2", &month);
    flag.set("3", &day);
    flag.set("status", &reason.to_string());
    flag
}

#[cfg(test)]
mod tests {
    use super::{LinkSite, RunDate, annotate_link};
    use crate::normalize::{normalize, split_overrun};
    use crate::status::{InvalidReason, Verdict};
    use crate::wikitext::Wikicode;

    const DATE: RunDate = RunDate {
        year: 2024,
        month: 5,
        day: 6,
    };

    fn site_for(code: &Wikicode, index: usize) -> LinkSite {
        let link = code.get(index).and_then(super::Node::as_extlink).expect("link");
        let (url_part, rest) = split_overrun(&link.url);
        let target = normalize(url_part).ok();
        LinkSite {
            index,
            url_part: url_part.to_string(),
            rest,
            target,
        }
    }

    fn annotated(source: &str, verdict: Option<Verdict>, language: &str) -> String {
        let mut code = Wikicode::parse(source);
        let links = code.extlink_indices();
        assert_eq!(links.len(), 1, "fixture should contain exactly one link");
        let site = site_for(&code, links[0]);
        let annotation = annotate_link(&code, &site, verdict, language, &DATE);
        code.apply(annotation.ops);
        code.render()
    }

    #[test]
    fn valid_link_drops_adjacent_marker() {
        let output = annotated(
            "https://ok.example.org/x {{Dead link|2020|01|01}} tail",
            Some(Verdict::Valid),
            "English",
        );
        assert_eq!(output, "https://ok.example.org/x  tail");
    }

    #[test]
    fn valid_link_without_marker_is_untouched() {
        let source = "before https://ok.example.org/x after";
        assert_eq!(annotated(source, Some(Verdict::Valid), "English"), source);
    }

    #[test]
    fn invalid_link_gets_localized_marker_with_dates() {
        let output = annotated(
            "see https://gone.example.org/x now",
            Some(Verdict::Invalid(InvalidReason::ClientError(404))),
            "Español",
        );
        assert_eq!(
            output,
            "see https://gone.example.org/x{{Dead link (Español)|2024|05|06|status=404}} now"
        );
    }

    #[test]
    fn unchanged_status_preserves_recorded_dates() {
        let source = "https://gone.example.org/x {{Dead link|2020|01|02|status=404}}";
        let output = annotated(
            source,
            Some(Verdict::Invalid(InvalidReason::ClientError(404))),
            "English",
        );
        assert_eq!(output, source);
    }

    #[test]
    fn changed_status_rewrites_status_and_dates() {
        let output = annotated(
            "https://gone.example.org/x {{Dead link|2020|01|02|status=domain name not resolved}}",
            Some(Verdict::Invalid(InvalidReason::ClientError(404))),
            "English",
        );
        assert_eq!(
            output,
            "https://gone.example.org/x {{Dead link|2024|05|06|status=404}}"
        );
    }

    #[test]
    fn existing_marker_is_localized_to_page_language() {
        let output = annotated(
            "https://gone.example.org/x {{Dead link|2020|01|02|status=404}}",
            Some(Verdict::Invalid(InvalidReason::ClientError(404))),
            "Español",
        );
        assert_eq!(
            output,
            "https://gone.example.org/x {{Dead link (Español)|2020|01|02|status=404}}"
        );
    }

    #[test]
    fn swallowed_marker_is_split_back_out_and_kept() {
        let source = "https://gone.example.org/x{{Dead link|2020|02|20|status=404}} tail";
        let mut code = Wikicode::parse(source);
        let links = code.extlink_indices();
        let site = site_for(&code, links[0]);
        assert!(site.rest.is_some());

        let annotation = annotate_link(
            &code,
            &site,
            Some(Verdict::Invalid(InvalidReason::ClientError(404))),
            "English",
            &DATE,
        );
        assert_eq!(annotation.ops.len(), 1);
        code.apply(annotation.ops);
        assert_eq!(code.render(), source);
        assert_eq!(code.extlink_indices().len(), 1);
        assert_eq!(code.template_indices().len(), 1);
    }

    #[test]
    fn swallowed_marker_is_removed_when_link_recovers() {
        let output = annotated(
            "https://ok.example.org/x{{Dead link|2020|02|20}} tail",
            Some(Verdict::Valid),
            "English",
        );
        assert_eq!(output, "https://ok.example.org/x tail");
    }

    #[test]
    fn indeterminate_verdict_changes_nothing() {
        let source = "https://busy.example.org/x {{Dead link|2020|01|02|status=503}}";
        assert_eq!(
            annotated(source, Some(Verdict::Indeterminate), "English"),
            source
        );
    }

    #[test]
    fn unchecked_link_is_still_split_apart() {
        let source = "ftp://old.example.org/f{{Dead link|2020|02|20}} tail";
        let output = annotated(source, None, "English");
        assert_eq!(output, source);

        let code = Wikicode::parse(source);
        let links = code.extlink_indices();
        let site = site_for(&code, links[0]);
        assert!(site.target.is_none());
        assert!(site.rest.is_some());
    }

    #[test]
    fn invalid_link_reports_its_canonical_url() {
        let code = Wikicode::parse("https://gone.example.org/x#frag more");
        let links = code.extlink_indices();
        let site = site_for(&code, links[0]);
        let annotation = annotate_link(
            &code,
            &site,
            Some(Verdict::Invalid(InvalidReason::DnsUnresolved)),
            "English",
            &DATE,
        );
        assert_eq!(
            annotation.report_line.as_deref(),
            Some("https://gone.example.org/x (domain name not resolved)")
        );
    }
}
