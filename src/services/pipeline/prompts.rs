use std::sync::OnceLock;

use minijinja::{Environment, context};

use crate::error::FinderError;

static ENV: OnceLock<Environment<'static>> = OnceLock::new();

fn env() -> Result<&'static Environment<'static>, FinderError> {
    if let Some(env) = ENV.get() {
        return Ok(env);
    }

    let mut env = Environment::new();
    env.add_template("prompt_system.j2", include_str!("../../../templates/prompt_system.j2"))?;
    env.add_template("prompt_match.j2", include_str!("../../../templates/prompt_match.j2"))?;
    env.add_template("prompt_extract.j2", include_str!("../../../templates/prompt_extract.j2"))?;
    env.add_template("prompt_verify.j2", include_str!("../../../templates/prompt_verify.j2"))?;
    env.add_template(
        "prompt_classify.j2",
        include_str!("../../../templates/prompt_classify.j2"),
    )?;

    let _ = ENV.set(env);
    ENV.get()
        .ok_or_else(|| FinderError::Config("prompt templates failed to initialize".into()))
}

pub(crate) fn system() -> Result<String, FinderError> {
    Ok(env()?
        .get_template("prompt_system.j2")?
        .render(context! {})?
        .trim()
        .to_string())
}

pub(crate) fn match_check(terms: &[String], url: &str, content: &str) -> Result<String, FinderError> {
    Ok(env()?.get_template("prompt_match.j2")?.render(context! {
        terms => terms,
        url => url,
        content => content,
    })?)
}

pub(crate) fn extract(disease_name: &str, url: &str, content: &str) -> Result<String, FinderError> {
    Ok(env()?.get_template("prompt_extract.j2")?.render(context! {
        disease_name => disease_name,
        url => url,
        content => content,
    })?)
}

pub(crate) fn verify(
    disease_name: &str,
    extracted: &serde_json::Value,
    content: &str,
) -> Result<String, FinderError> {
    let extracted = serde_json::to_string_pretty(extracted)?;
    Ok(env()?.get_template("prompt_verify.j2")?.render(context! {
        disease_name => disease_name,
        extracted => extracted,
        content => content,
    })?)
}

pub(crate) fn classify(disease_name: &str, url: &str, content: &str) -> Result<String, FinderError> {
    Ok(env()?.get_template("prompt_classify.j2")?.render(context! {
        disease_name => disease_name,
        url => url,
        content => content,
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_prompt_lists_every_term() {
        let prompt = match_check(
            &["ファブリー病".into(), "Fabry disease".into()],
            "https://fabry.example.jp/",
            "本文",
        )
        .expect("render");
        assert!(prompt.contains("- ファブリー病\n- Fabry disease\n"));
        assert!(prompt.contains("URL: https://fabry.example.jp/"));
        assert!(prompt.contains("\"is_match\""));
    }

    #[test]
    fn verify_prompt_embeds_extracted_json() {
        let prompt = verify(
            "ファブリー病",
            &serde_json::json!({"name": "患者会"}),
            "本文",
        )
        .expect("render");
        assert!(prompt.contains("「ファブリー病」"));
        assert!(prompt.contains("\"name\": \"患者会\""));
    }

    #[test]
    fn system_prompt_is_single_line() {
        let system = system().expect("render");
        assert!(!system.contains('\n'));
        assert!(system.contains("JSON"));
    }
}
