use axum::response::Html;

const LAYOUT_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8" />
<meta name="viewport" content="width=device-width, initial-scale=1.0" />
"#;

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "{LAYOUT_HEAD}<title>{title} - rolebase</title>\n</head>\n<body>\n\
         <nav><a href=\"/\">Home</a> | <a href=\"/home/privacy\">Privacy</a></nav>\n\
         <main>\n{body}\n</main>\n</body>\n</html>\n"
    ))
}

pub async fn index() -> Html<String> {
    page(
        "Home",
        "<h1>Welcome</h1>\n<p>Sign in through <code>POST /account/login</code> to receive a session token.</p>",
    )
}

pub async fn privacy() -> Html<String> {
    page(
        "Privacy Policy",
        "<h1>Privacy Policy</h1>\n<p>Account emails and hashed credentials are the only personal data stored.</p>",
    )
}

pub async fn error() -> Html<String> {
    page(
        "Error",
        "<h1 class=\"text-danger\">Error.</h1>\n<h2 class=\"text-danger\">An error occurred while processing your request.</h2>",
    )
}
