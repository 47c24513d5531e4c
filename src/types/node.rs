use serde::{Deserialize, Serialize};

/// A bookmark (has a `url`) or a folder (no `url`) as reported by the tree host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub parent_id: Option<String>,
    pub index: u32,
    pub title: String,
    pub url: Option<String>,
    pub date_added: i64,
    pub date_modified: Option<i64>,
}

impl Node {
    /// Returns true when this node is a bookmark rather than a folder.
    pub fn is_bookmark(&self) -> bool {
        self.url.is_some()
    }

    pub fn is_folder(&self) -> bool {
        self.url.is_none()
    }
}

/// The persisted, denormalized projection of a [`Node`] with precomputed search fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmarkRecord {
    pub id: String,
    pub parent_id: Option<String>,
    pub index: u32,
    pub title: String,
    pub url: Option<String>,
    pub date_added: i64,
    pub date_modified: Option<i64>,
    pub title_lower: String,
    pub url_lower: Option<String>,
    pub domain: Option<String>,
    pub keywords: Vec<String>,
    pub tags: Vec<String>,
    /// Materialized ancestor titles, root first. `None` until computed.
    pub path: Option<Vec<String>>,
    pub children_count: u32,
}

impl BookmarkRecord {
    /// Builds a record from a node, deriving every search field.
    pub fn from_node(node: &Node) -> Self {
        let title_lower = node.title.to_lowercase();
        let url_lower = node.url.as_ref().map(|u| u.to_lowercase());
        let domain = node.url.as_deref().and_then(extract_domain);
        let keywords = extract_keywords(&node.title, node.url.as_deref());
        let tags = extract_tags(&node.title);
        Self {
            id: node.id.clone(),
            parent_id: node.parent_id.clone(),
            index: node.index,
            title: node.title.clone(),
            url: node.url.clone(),
            date_added: node.date_added,
            date_modified: node.date_modified,
            title_lower,
            url_lower,
            domain,
            keywords,
            tags,
            path: None,
            children_count: 0,
        }
    }

    /// Re-derives the search fields after `title` or `url` changed.
    pub fn refresh_derived(&mut self) {
        self.title_lower = self.title.to_lowercase();
        self.url_lower = self.url.as_ref().map(|u| u.to_lowercase());
        self.domain = self.url.as_deref().and_then(extract_domain);
        self.keywords = extract_keywords(&self.title, self.url.as_deref());
        self.tags = extract_tags(&self.title);
    }

    pub fn is_bookmark(&self) -> bool {
        self.url.is_some()
    }

    /// Joins the materialized path with ` / `.
    pub fn path_string(&self) -> Option<String> {
        self.path.as_ref().map(|p| p.join(" / "))
    }

    pub fn to_node(&self) -> Node {
        Node {
            id: self.id.clone(),
            parent_id: self.parent_id.clone(),
            index: self.index,
            title: self.title.clone(),
            url: self.url.clone(),
            date_added: self.date_added,
            date_modified: self.date_modified,
        }
    }
}

impl From<&Node> for BookmarkRecord {
    fn from(node: &Node) -> Self {
        Self::from_node(node)
    }
}

/// Extracts the host of a URL, lowercased and without a leading `www.`.
pub fn extract_domain(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").map(str::to_string).unwrap_or(host);
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Tokenizes a title and the path of a URL into lowercase, de-duplicated terms.
///
/// Terms shorter than two characters are dropped. The URL scheme and host are
/// skipped because they are already covered by the URL and domain indexes.
pub fn extract_keywords(title: &str, url: Option<&str>) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    let mut push_terms = |text: &str| {
        for term in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= 2)
            .map(str::to_lowercase)
        {
            if !keywords.contains(&term) {
                keywords.push(term);
            }
        }
    };

    push_terms(title);
    if let Some(parsed) = url.and_then(|u| url::Url::parse(u).ok()) {
        push_terms(parsed.path());
    }
    keywords
}

/// Collects `#hashtag` words from a title, lowercased and without the `#`.
pub fn extract_tags(title: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for word in title.split_whitespace() {
        if let Some(tag) = word.strip_prefix('#') {
            let tag: String = tag
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
                .collect::<String>()
                .to_lowercase();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }
    tags
}
