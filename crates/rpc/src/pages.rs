//! Server-rendered HTML forms.

use medvault_types::HospitalRegistry;

const STYLE: &str = "body{font-family:sans-serif;max-width:40rem;margin:3rem auto;}\
label{display:block;margin-top:1rem;}input,select{width:100%;padding:.4rem;}\
button{margin-top:1.5rem;padding:.5rem 1.5rem;}";

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title} · MedVault</title>\n<style>{STYLE}</style>\n</head>\n\
         <body>\n<h1>{title}</h1>\n{body}\n</body>\n</html>\n"
    )
}

pub fn index() -> String {
    layout(
        "MedVault",
        "<p>Patient records anchored on the ledger.</p>\n\
         <ul>\n\
         <li><a href=\"/upload_page\">Upload a patient file</a></li>\n\
         <li><a href=\"/download_page\">Download a patient file</a></li>\n\
         </ul>",
    )
}

pub fn upload(hospitals: &HospitalRegistry) -> String {
    let body = format!(
        "<form action=\"/upload\" method=\"post\" enctype=\"multipart/form-data\">\n\
         <label>Patient ID <input name=\"patient_id\" required></label>\n\
         <label>Grant access to {select}</label>\n\
         <label>File <input type=\"file\" name=\"file\" required></label>\n\
         <button type=\"submit\">Upload</button>\n\
         </form>\n<p><a href=\"/\">Back</a></p>",
        select = hospital_select(hospitals)
    );
    layout("Upload patient file", &body)
}

pub fn download(hospitals: &HospitalRegistry) -> String {
    let body = format!(
        "<form action=\"/download\" method=\"post\">\n\
         <label>Patient ID <input name=\"patient_id\" required></label>\n\
         <label>Requesting hospital {select}</label>\n\
         <button type=\"submit\">Download</button>\n\
         </form>\n<p><a href=\"/\">Back</a></p>",
        select = hospital_select(hospitals)
    );
    layout("Download patient file", &body)
}

fn hospital_select(hospitals: &HospitalRegistry) -> String {
    let mut select = String::from("<select name=\"hospital\" required>\n");
    for name in hospitals.names() {
        let name = escape(name);
        select.push_str(&format!("<option value=\"{name}\">{name}</option>\n"));
    }
    select.push_str("</select>");
    select
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forms_list_every_hospital() {
        let registry = HospitalRegistry::with_defaults();
        for page in [upload(&registry), download(&registry)] {
            for name in registry.names() {
                assert!(page.contains(&format!("<option value=\"{name}\">")));
            }
        }
        assert!(upload(&registry).contains("enctype=\"multipart/form-data\""));
    }

    #[test]
    fn hospital_names_are_escaped() {
        let registry = HospitalRegistry::from_pairs([(
            "St. <Mary> & \"Co\"",
            "0x4444444444444444444444444444444444444444",
        )])
        .unwrap();
        let page = download(&registry);
        assert!(page.contains("St. &lt;Mary&gt; &amp; &quot;Co&quot;"));
        assert!(!page.contains("<Mary>"));
    }
}
