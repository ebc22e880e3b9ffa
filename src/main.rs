use std::fs;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use rand::prelude::*;
use tracing::{debug, info};

use result_flattener::dataset::rows_from_xml;
use result_flattener::log::init_logging;
use result_flattener::schema::xsd::schema_from_xsd;
use result_flattener::store::RawResultPage;
use result_flattener::{
    load_settings, CellValue, ResultFetcher, ResultRequest, ResultSource, ResultStore, SchemaCache, SchemaNode,
};

/// Serves a dataset that is already in memory, one page per request.
struct LocalFetcher {
    schema: SchemaNode,
    rows: Vec<CellValue>,
}

impl ResultFetcher for LocalFetcher {
    fn fetch_schema(&self, _source: &ResultSource) -> result_flattener::Result<SchemaNode> {
        Ok(self.schema.clone())
    }

    fn fetch_rows(&self, request: &ResultRequest) -> result_flattener::Result<RawResultPage> {
        let start = (request.start as usize).min(self.rows.len());
        let end = (start + request.count as usize).min(self.rows.len());
        Ok(RawResultPage {
            start: request.start,
            count: (end - start) as u64,
            total: self.rows.len() as f64,
            rows: self.rows[start..end].to_vec(),
        })
    }
}

/// Usage: `result_flattener [SCHEMA.xsd DATASET.xml]`. Without arguments a
/// random sample dataset is generated.
fn main() -> anyhow::Result<()> {
    let settings = load_settings("result_flattener").context("loading settings")?;
    let _guard = init_logging(&settings.log);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (xsd, xml) = match args.as_slice() {
        [xsd_path, xml_path] => (
            fs::read_to_string(xsd_path).with_context(|| format!("reading {xsd_path}"))?,
            fs::read_to_string(xml_path).with_context(|| format!("reading {xml_path}"))?,
        ),
        [] => (SAMPLE_XSD.to_string(), big_xml(2000)),
        _ => anyhow::bail!("expected either no arguments or SCHEMA.xsd DATASET.xml"),
    };

    let started = Instant::now();
    let schema = schema_from_xsd(&xsd).context("parsing schema")?;
    let rows = rows_from_xml(&xml).context("parsing dataset")?;
    info!(rows = rows.len(), elapsed = ?started.elapsed(), "parsed dataset");

    let source = ResultSource::Workunit {
        wuid: "W20250101-000000".into(),
        sequence: 0,
    };
    let fetcher = Arc::new(LocalFetcher { schema, rows });
    let store = ResultStore::new(source, fetcher, Arc::new(SchemaCache::new()))
        .with_settings(&settings.store, &settings.formatter)?;

    for column in store.structure()?.iter() {
        debug!(field = %column.field, width = column.width, label = %column.header_label(), "column");
    }

    let started = Instant::now();
    let page = store.page_number(1)?;
    info!(rows = page.rows.len(), total = page.total, elapsed = ?started.elapsed(), "formatted first page");

    for row in &page.rows {
        println!("{}", serde_json::to_string(row)?);
    }
    Ok(())
}

const SAMPLE_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:hpcc="urn:hpccsystems:xsd:appinfo">
 <xs:element name="Dataset">
  <xs:complexType>
   <xs:sequence minOccurs="0" maxOccurs="unbounded">
    <xs:element name="Row">
     <xs:complexType>
      <xs:sequence>
       <xs:element name="Id" type="xs:integer">
        <xs:annotation><xs:appinfo hpcc:keyed="true"/></xs:annotation>
       </xs:element>
       <xs:element name="Name" type="string20"/>
       <xs:element name="Value" type="xs:double"/>
       <xs:element name="Category" type="xs:string"/>
       <xs:element name="Link__html" type="xs:string"/>
       <xs:element name="Tags" minOccurs="0">
        <xs:complexType><xs:sequence maxOccurs="unbounded">
         <xs:element name="Row" minOccurs="0" maxOccurs="unbounded">
          <xs:complexType><xs:sequence>
           <xs:element name="Tag" type="xs:string"/>
          </xs:sequence></xs:complexType>
         </xs:element>
        </xs:sequence></xs:complexType>
       </xs:element>
       <xs:element name="Trials" minOccurs="0">
        <xs:complexType><xs:sequence maxOccurs="unbounded">
         <xs:element name="Row" minOccurs="0" maxOccurs="unbounded">
          <xs:complexType><xs:sequence>
           <xs:element name="Trial" type="xs:integer"/>
           <xs:element name="Readings" minOccurs="0">
            <xs:complexType><xs:sequence maxOccurs="unbounded">
             <xs:element name="Row" minOccurs="0" maxOccurs="unbounded">
              <xs:complexType><xs:sequence>
               <xs:element name="Reading" type="xs:double"/>
              </xs:sequence></xs:complexType>
             </xs:element>
            </xs:sequence></xs:complexType>
           </xs:element>
          </xs:sequence></xs:complexType>
         </xs:element>
        </xs:sequence></xs:complexType>
       </xs:element>
       <xs:element name="Notes__hidden" type="xs:string"/>
      </xs:sequence>
     </xs:complexType>
    </xs:element>
   </xs:sequence>
  </xs:complexType>
 </xs:element>
 <xs:simpleType name="string20">
  <xs:restriction base="xs:string"><xs:maxLength value="20"/></xs:restriction>
 </xs:simpleType>
</xs:schema>"#;

/// Generates a dataset with missing fields and nested child datasets of varying size.
fn big_xml(records: usize) -> String {
    let mut rng = rand::rng();
    let all_tags = [
        "fast", "reliable", "secure", "scalable",
        "resilient", "portable", "robust", "maintainable",
    ];

    let mut xml = String::from("<Dataset name=\"Result 1\">\n");

    for i in 0..records {
        let name = if rng.random_bool(0.9) {
            format!("<Name>Alpha{i}</Name>")
        } else {
            String::new()
        };

        let value = if rng.random_bool(0.85) {
            format!("<Value>{:.2}</Value>", 40.0 + (i as f64) * 0.1)
        } else {
            String::new()
        };

        let category = match i % 3 {
            0 => "science",
            1 => "engineering",
            _ => "mathematics & <other>",
        };
        let category = format!("<Category>{}</Category>", quick_xml::escape::escape(category));

        let link = format!(
            "<Link__html>{}</Link__html>",
            quick_xml::escape::escape(&format!("<a href='#/records/{i}'>open</a>"))
        );

        // 0–5 tags
        let tag_count = rng.random_range(0..=5);
        let mut tags = String::new();
        if tag_count > 0 {
            tags.push_str("<Tags>");
            for _ in 0..tag_count {
                let tag = all_tags.choose(&mut rng).copied().unwrap_or("fast");
                tags.push_str(&format!("<Row><Tag>{tag}</Tag></Row>"));
            }
            tags.push_str("</Tags>");
        }

        // trial → reading
        let mut trials = String::new();
        if rng.random_bool(0.7) {
            trials.push_str("<Trials>");
            for trial in 0..rng.random_range(1..=3) {
                trials.push_str(&format!("<Row><Trial>{trial}</Trial><Readings>"));
                for _ in 0..rng.random_range(1..=4) {
                    let reading: f64 = rng.random_range(10.0..100.0);
                    trials.push_str(&format!("<Row><Reading>{reading:.2}</Reading></Row>"));
                }
                trials.push_str("</Readings></Row>");
            }
            trials.push_str("</Trials>");
        }

        xml.push_str(&format!(
            "<Row><Id>{}</Id>{name}{value}{category}{link}{tags}{trials}<Notes__hidden>n{i}</Notes__hidden></Row>\n",
            1000 + i
        ));
    }

    xml.push_str("</Dataset>");
    xml
}
