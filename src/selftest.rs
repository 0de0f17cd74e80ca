//! Client-side smoke test: one known-good program per language, posted to a
//! running server like any other client would.

use crate::config::SelfTestArgs;
use crate::languages::LanguageTable;
use crate::server::routes::MASTER_KEY_HEADER;
use anyhow::{Context, Result};
use base64::Engine as _;
use colored::Colorize;
use serde::Deserialize;

/// Language id and a program that prints `Success!`.
pub const SNIPPETS: &[(&str, &str)] = &[
    ("1", r#"print("Success!")"#),
    ("2", r#"console.log("Success!");"#),
    ("3", r#"echo "Success!""#),
    ("4", r#"print "Success!";"#),
    ("5", r#"print("Success!")"#),
    ("6", r#"puts "Success!""#),
    (
        "7",
        "#include <stdio.h>\nint main() {\n   printf(\"Success!\");\n   return 0;\n}\n",
    ),
    (
        "8",
        "#include <iostream>\nint main() {\n   std::cout << \"Success!\";\n   return 0;\n}\n",
    ),
    ("9", r#"fn main() { println!("Success!"); }"#),
    ("10", "program hello\n print *, \"Success!\"\nend program hello\n"),
    ("11", r#"main = putStrLn "Success!""#),
    (
        "12",
        "public class HelloWorld {\n   public static void main(String[] args) {\n       System.out.println(\"Success!\");\n   }\n}\n",
    ),
    (
        "13",
        "package main\nimport \"fmt\"\nfunc main() { fmt.Println(\"Success!\") }\n",
    ),
];

#[derive(Debug, Deserialize)]
struct RunResponse {
    #[serde(default)]
    stdout: String,
}

/// Build the JSON body for one snippet.
pub fn payload(language_id: &str, code: &str) -> serde_json::Value {
    serde_json::json!({
        "language_id": language_id,
        "code": base64::engine::general_purpose::STANDARD.encode(code),
    })
}

/// Returns the number of languages that did not print `Success!`.
pub async fn run(args: &SelfTestArgs) -> Result<usize> {
    let scheme = if args.tls { "https" } else { "http" };
    let url = format!("{}://{}:{}/run", scheme, args.host, args.port);
    let client = reqwest::Client::builder()
        .build()
        .context("Could not build HTTP client")?;

    let languages = args.langs.as_deref().map(LanguageTable::from_file).transpose()?;

    let mut failures = 0;
    for (id, code) in selected(SNIPPETS, languages.as_ref()) {
        let response = client
            .post(&url)
            .header(MASTER_KEY_HEADER, &args.key)
            .json(&payload(id, code))
            .send()
            .await;

        let outcome = match response {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                let passed = status.is_success()
                    && serde_json::from_str::<RunResponse>(&body)
                        .map(|r| r.stdout.contains("Success!"))
                        .unwrap_or(false);
                (passed, format!("{} {}", status.as_u16(), body.trim()))
            }
            Err(e) => (false, format!("request failed: {}", e)),
        };

        match outcome {
            (true, line) => println!("{}", format!("{} {}", id, line).green()),
            (false, line) => {
                failures += 1;
                println!("{}", format!("{} {}", id, line).red());
            }
        }
    }
    Ok(failures)
}

/// Snippets whose language id is in `languages`, or all of them.
fn selected<'a>(
    snippets: &'a [(&'a str, &'a str)],
    languages: Option<&'a LanguageTable>,
) -> impl Iterator<Item = &'a (&'a str, &'a str)> {
    snippets
        .iter()
        .filter(move |(id, _)| languages.map_or(true, |table| table.get(id).is_some()))
}
