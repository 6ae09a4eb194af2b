// src/emit/pkg/distribution.rs
//! Distribution XML patching
//!
//! `productbuild --synthesize` writes a bare distribution listing the
//! component packages. The installer's look and choices are added here by
//! streaming the document through quick-xml and rewriting a few elements.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::error::{Error, Result};

/// The user-visible choice that initializes conda in shell startup files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChoice {
    /// Package identifier the choice installs
    pub id: String,
    pub title: String,
    pub description: String,
    pub selected: bool,
}

/// What to inject into the synthesized distribution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionOptions {
    pub title: String,
    /// Resource file names, relative to the `--resources` directory
    pub license: Option<String>,
    pub welcome: Option<String>,
    pub readme: Option<String>,
    pub conclusion: Option<String>,
    pub background: Option<String>,
    /// `enable_anywhere`, `enable_currentUserHome`, `enable_localSystem`
    pub domains: BTreeMap<String, bool>,
    pub path_choice: Option<PathChoice>,
}

fn xml_err(e: impl Display) -> Error {
    Error::Emit(format!("distribution XML: {e}"))
}

fn attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    e.attributes()
        .map(|attr| {
            let attr = attr.map_err(xml_err)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(xml_err)?.into_owned();
            Ok((key, value))
        })
        .collect()
}

fn element(name: &str, attrs: &[(String, String)]) -> BytesStart<'static> {
    let mut e = BytesStart::new(name.to_string());
    for (k, v) in attrs {
        e.push_attribute((k.as_str(), v.as_str()));
    }
    e
}

fn set_attr(attrs: &mut Vec<(String, String)>, key: &str, value: &str) {
    match attrs.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value.to_string(),
        None => attrs.push((key.to_string(), value.to_string())),
    }
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

/// Elements injected right after the root start tag
fn header_elements(opts: &DistributionOptions) -> Vec<Event<'static>> {
    let mut events = Vec::new();
    events.push(Event::Start(BytesStart::new("title")));
    events.push(Event::Text(BytesText::new(&opts.title).into_owned()));
    events.push(Event::End(BytesEnd::new("title")));

    let resources = [
        ("license", &opts.license),
        ("welcome", &opts.welcome),
        ("readme", &opts.readme),
        ("conclusion", &opts.conclusion),
    ];
    for (name, file) in resources {
        if let Some(file) = file {
            events.push(Event::Empty(element(name, &[("file".to_string(), file.clone())])));
        }
    }
    if let Some(bg) = &opts.background {
        let attrs = [
            ("file".to_string(), bg.clone()),
            ("alignment".to_string(), "bottomleft".to_string()),
            ("scaling".to_string(), "none".to_string()),
        ];
        events.push(Event::Empty(element("background", &attrs)));
    }

    let domains: Vec<(String, String)> = opts
        .domains
        .iter()
        .map(|(k, v)| (k.clone(), v.to_string()))
        .collect();
    if !domains.is_empty() {
        events.push(Event::Empty(element("domains", &domains)));
    }
    events
}

/// Rewrite a synthesized distribution document
///
/// Existing `title`, `options` and `domains` elements are replaced. The
/// `default` choice gets the installer title; the PATH choice, when given,
/// becomes visible and carries its description. Every other choice stays
/// hidden.
pub fn patch(xml: &str, opts: &DistributionOptions) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
    let mut skip_depth = 0usize;
    let mut saw_options = false;

    loop {
        let event = reader.read_event().map_err(xml_err)?;
        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => return Err(xml_err("unterminated element")),
                _ => {}
            }
            continue;
        }

        match event {
            Event::Eof => break,
            Event::Decl(_) => {
                writer
                    .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
                    .map_err(xml_err)?;
            }
            Event::Start(e) if e.name().as_ref() == b"installer-gui-script" => {
                writer.write_event(Event::Start(e)).map_err(xml_err)?;
                for injected in header_elements(opts) {
                    writer.write_event(injected).map_err(xml_err)?;
                }
            }
            Event::Start(e) if matches!(e.name().as_ref(), b"title" | b"domains") => {
                skip_depth = 1;
            }
            Event::Empty(e) if matches!(e.name().as_ref(), b"title" | b"domains") => {}
            Event::Start(e) if e.name().as_ref() == b"options" => {
                if !saw_options {
                    write_options(&mut writer, attributes(&e)?)?;
                    saw_options = true;
                }
                skip_depth = 1;
            }
            Event::Empty(e) if e.name().as_ref() == b"options" => {
                if !saw_options {
                    write_options(&mut writer, attributes(&e)?)?;
                    saw_options = true;
                }
            }
            Event::Empty(e) if e.name().as_ref() == b"choice" => {
                let attrs = patch_choice(attributes(&e)?, opts);
                writer
                    .write_event(Event::Empty(element("choice", &attrs)))
                    .map_err(xml_err)?;
            }
            Event::Start(e) if e.name().as_ref() == b"choice" => {
                let attrs = patch_choice(attributes(&e)?, opts);
                writer
                    .write_event(Event::Start(element("choice", &attrs)))
                    .map_err(xml_err)?;
            }
            Event::End(e) if e.name().as_ref() == b"installer-gui-script" => {
                if !saw_options {
                    write_options(&mut writer, Vec::new())?;
                }
                writer.write_event(Event::End(e)).map_err(xml_err)?;
            }
            other => writer.write_event(other).map_err(xml_err)?,
        }
    }

    String::from_utf8(writer.into_inner()).map_err(xml_err)
}

fn write_options(writer: &mut Writer<Vec<u8>>, mut attrs: Vec<(String, String)>) -> Result<()> {
    set_attr(&mut attrs, "customize", "allow");
    set_attr(&mut attrs, "customLocation", "/");
    writer
        .write_event(Event::Empty(element("options", &attrs)))
        .map_err(xml_err)
}

fn patch_choice(mut attrs: Vec<(String, String)>, opts: &DistributionOptions) -> Vec<(String, String)> {
    let id = attr(&attrs, "id").unwrap_or_default().to_string();
    if id == "default" {
        set_attr(&mut attrs, "title", &opts.title);
        return attrs;
    }
    match &opts.path_choice {
        Some(choice) if choice.id == id => {
            set_attr(&mut attrs, "visible", "true");
            set_attr(&mut attrs, "title", &choice.title);
            set_attr(&mut attrs, "description", &choice.description);
            set_attr(&mut attrs, "start_selected", if choice.selected { "true" } else { "false" });
        }
        _ => set_attr(&mut attrs, "visible", "false"),
    }
    attrs
}
