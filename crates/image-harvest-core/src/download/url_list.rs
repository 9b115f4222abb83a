//! URL list files: folder names followed by the URLs to download into them.
//!
//! ```text
//! Red Cars https://a.example/1.jpg, https://a.example/2.jpg
//! https://a.example/3.jpg
//! trucks
//! https://b.example/9.png
//! ```

/// URLs destined for one folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlBatch {
    pub folder: String,
    pub urls: Vec<String>,
}

fn is_url(token: &str) -> bool {
    token.starts_with("http://") || token.starts_with("https://")
}

/// Folder names become directory names; path separators and dot-only names are neutralised
fn sanitize_folder(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}

/// Parse a URL list. URLs appearing before the first folder line are ignored,
/// and folders that end up without URLs are dropped.
pub fn parse_url_list(text: &str) -> Vec<UrlBatch> {
    let mut batches: Vec<UrlBatch> = Vec::new();
    let mut current: Option<UrlBatch> = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if is_url(line) {
            if let Some(batch) = current.as_mut() {
                batch.urls.push(line.to_string());
            }
            continue;
        }

        if let Some(batch) = current.take() {
            batches.push(batch);
        }

        let parts: Vec<&str> = line
            .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
            .filter(|p| !p.is_empty())
            .collect();

        let (folder, rest) = if parts.len() > 1 && !is_url(parts[1]) {
            (format!("{} {}", parts[0], parts[1]), &parts[2..])
        } else {
            (parts[0].to_string(), &parts[1..])
        };

        current = Some(UrlBatch {
            folder: sanitize_folder(&folder),
            urls: rest
                .iter()
                .filter(|p| is_url(p))
                .map(|p| p.to_string())
                .collect(),
        });
    }

    if let Some(batch) = current {
        batches.push(batch);
    }

    batches.retain(|b| !b.urls.is_empty());
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_folders_and_urls() {
        let text = "\
https://orphan.example/0.jpg

Red Cars https://a.example/1.jpg, https://a.example/2.jpg
https://a.example/3.jpg
trucks
   https://b.example/9.png
empty folder
boats;https://c.example/5.webp
";
        let batches = parse_url_list(text);

        assert_eq!(
            batches,
            vec![
                UrlBatch {
                    folder: "Red Cars".to_string(),
                    urls: vec![
                        "https://a.example/1.jpg".to_string(),
                        "https://a.example/2.jpg".to_string(),
                        "https://a.example/3.jpg".to_string(),
                    ],
                },
                UrlBatch {
                    folder: "trucks".to_string(),
                    urls: vec!["https://b.example/9.png".to_string()],
                },
                UrlBatch {
                    folder: "boats".to_string(),
                    urls: vec!["https://c.example/5.webp".to_string()],
                },
            ]
        );
    }

    #[test]
    fn test_folder_names_cannot_escape() {
        let batches = parse_url_list("../etc\nhttps://a.example/1.jpg\n..\nhttps://a.example/2.jpg");
        assert_eq!(batches[0].folder, ".._etc");
        assert_eq!(batches[1].folder, "__");
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_url_list("").is_empty());
        assert!(parse_url_list("https://a.example/1.jpg\n").is_empty());
    }
}
