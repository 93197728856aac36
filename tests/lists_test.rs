mod common;

use cms_provision::cms::{
    Cms, FieldInfo, FieldKind, FieldValue, Geolocation, ListTemplate,
};
use cms_provision::reconciliation::{reconcile_lists, RunSummary};
use common::{create_site, create_test_dir, open_session, SITE};

#[tokio::test]
async fn test_creates_list_with_stripped_url_and_display_title() {
    let temp = create_test_dir();
    let (cms, root) = create_site().await;
    let session = open_session(
        &cms,
        r#"<pnp:lists><pnp:ListInstance Title="Team News" TemplateType="Bogus" /></pnp:lists>"#,
        temp.path(),
    )
    .await;

    let mut summary = RunSummary::default();
    reconcile_lists(&session, &mut summary).await.unwrap();

    let list = cms
        .list_by_title(&root, "Team News")
        .await
        .unwrap()
        .expect("List should be created");
    assert_eq!(list.root_folder_url, "/sites/portal/Lists/TeamNews");
    assert_eq!(
        cms.list_template(&root, "Team News").await,
        Some(ListTemplate::GenericList)
    );
    assert_eq!(summary.sections_failed, 0);
}

#[tokio::test]
async fn test_existing_list_is_not_duplicated() {
    let temp = create_test_dir();
    let (cms, root) = create_site().await;
    let session = open_session(
        &cms,
        r#"<pnp:lists><pnp:ListInstance Title="Docs" TemplateType="DocumentLibrary" /></pnp:lists>"#,
        temp.path(),
    )
    .await;

    let mut summary = RunSummary::default();
    reconcile_lists(&session, &mut summary).await.unwrap();
    let before = cms.list_titles(&root).await;
    reconcile_lists(&session, &mut summary).await.unwrap();

    assert_eq!(cms.list_titles(&root).await, before);
    assert_eq!(summary.sections_failed, 0);
}

#[tokio::test]
async fn test_bindings_replace_existing_content_types() {
    let temp = create_test_dir();
    let (cms, root) = create_site().await;
    cms.add_content_type(&root, "0x010100AA", "Article").await;
    let session = open_session(
        &cms,
        r#"<pnp:lists>
  <pnp:ListInstance Title="Articles" TemplateType="DocumentLibrary" RemoveExistingContentTypes="true">
    <pnp:ContentTypeBindings>
      <pnp:ContentTypeBinding ContentTypeID="0x010100AA" Default="true" />
    </pnp:ContentTypeBindings>
  </pnp:ListInstance>
</pnp:lists>"#,
        temp.path(),
    )
    .await;

    let mut summary = RunSummary::default();
    reconcile_lists(&session, &mut summary).await.unwrap();

    assert_eq!(cms.content_type_names(&root, "Articles").await, vec!["Article"]);
}

#[tokio::test]
async fn test_rebound_content_type_is_not_removed() {
    let temp = create_test_dir();
    let (cms, root) = create_site().await;
    cms.add_content_type(&root, "0x010100AA", "Article").await;
    let session = open_session(
        &cms,
        r#"<pnp:lists>
  <pnp:ListInstance Title="Articles" TemplateType="DocumentLibrary" RemoveExistingContentTypes="true">
    <pnp:ContentTypeBindings>
      <pnp:ContentTypeBinding ContentTypeID="0x0101" />
      <pnp:ContentTypeBinding ContentTypeID="0x010100AA" Default="true" />
    </pnp:ContentTypeBindings>
  </pnp:ListInstance>
</pnp:lists>"#,
        temp.path(),
    )
    .await;

    let mut summary = RunSummary::default();
    reconcile_lists(&session, &mut summary).await.unwrap();

    assert_eq!(
        cms.content_type_names(&root, "Articles").await,
        vec!["Article", "Document"]
    );
}

#[tokio::test]
async fn test_failing_list_does_not_stop_the_section() {
    let temp = create_test_dir();
    let (cms, root) = create_site().await;
    let session = open_session(
        &cms,
        r#"<pnp:lists>
  <pnp:ListInstance Title="Broken">
    <pnp:ContentTypeBindings><pnp:ContentTypeBinding ContentTypeID="0x0199" /></pnp:ContentTypeBindings>
  </pnp:ListInstance>
  <pnp:ListInstance Title="Fine" />
</pnp:lists>"#,
        temp.path(),
    )
    .await;

    let mut summary = RunSummary::default();
    reconcile_lists(&session, &mut summary).await.unwrap();

    assert_eq!(summary.sections_attempted, 2);
    assert_eq!(summary.sections_failed, 1);
    assert!(cms.list_by_title(&root, "Fine").await.unwrap().is_some());
}

#[tokio::test]
async fn test_data_rows_are_coerced_by_field_kind() {
    let temp = create_test_dir();
    let (cms, root) = create_site().await;
    cms.add_list(&root, "Offices", ListTemplate::GenericList).await;
    let (term_set_id, term_id) = cms.add_term("Corporate", "Departments", "Finance").await;
    let user_id = cms.add_user("corp\\jane").await;
    for field in [
        FieldInfo { internal_name: "Location".into(), kind: FieldKind::Geolocation },
        FieldInfo { internal_name: "Link".into(), kind: FieldKind::Url },
        FieldInfo { internal_name: "Owner".into(), kind: FieldKind::User },
        FieldInfo { internal_name: "Department".into(), kind: FieldKind::Taxonomy { term_set_id } },
    ] {
        cms.add_field(&root, "Offices", field).await;
    }

    let session = open_session(
        &cms,
        r#"<pnp:lists>
  <pnp:ListInstance Title="Offices">
    <pnp:DataRows>
      <pnp:DataRow Title="{sitecollection}/berlin" location="10,52.5,13.4,0" Link="http://x,Desc" Owner="corp\jane" Department="Finance" Unknown="ignored" />
    </pnp:DataRows>
  </pnp:ListInstance>
</pnp:lists>"#,
        temp.path(),
    )
    .await;

    let mut summary = RunSummary::default();
    reconcile_lists(&session, &mut summary).await.unwrap();

    let items = cms.items(&root, "Offices").await;
    assert_eq!(items.len(), 1);
    let values = &items[0].values;
    assert_eq!(values["Title"], FieldValue::Text("/sites/portal/berlin".into()));
    assert_eq!(
        values["Location"],
        FieldValue::Geolocation(Geolocation {
            altitude: 10.0,
            latitude: 52.5,
            longitude: 13.4,
            measure: 0.0
        })
    );
    assert_eq!(
        values["Link"],
        FieldValue::Url { url: "http://x".into(), description: "Desc".into() }
    );
    assert_eq!(
        values["Owner"],
        FieldValue::User { id: user_id, login: "corp\\jane".into() }
    );
    assert_eq!(
        values["Department"],
        FieldValue::Taxonomy { term_id, label: "Finance".into() }
    );
    assert!(!values.contains_key("Unknown"));
    assert_eq!(summary.rows_failed, 0);
}

#[tokio::test]
async fn test_failing_row_is_isolated_and_partially_saved() {
    let temp = create_test_dir();
    let (cms, root) = create_site().await;
    cms.add_list(&root, "Offices", ListTemplate::GenericList).await;
    cms.add_field(
        &root,
        "Offices",
        FieldInfo { internal_name: "Building".into(), kind: FieldKind::Lookup },
    )
    .await;

    let session = open_session(
        &cms,
        r#"<pnp:lists>
  <pnp:ListInstance Title="Offices">
    <pnp:DataRows>
      <pnp:DataRow Title="First" Building="1" />
      <pnp:DataRow Title="Broken" Building="not a number" />
      <pnp:DataRow Title="Third" Building="3" />
    </pnp:DataRows>
  </pnp:ListInstance>
</pnp:lists>"#,
        temp.path(),
    )
    .await;

    let mut summary = RunSummary::default();
    reconcile_lists(&session, &mut summary).await.unwrap();

    assert_eq!(summary.rows_failed, 1);
    assert_eq!(summary.sections_failed, 0);

    let items = cms.items(&root, "Offices").await;
    let titles: Vec<String> = items.iter().filter_map(|i| i.text("Title")).collect();
    assert_eq!(titles, vec!["First", "Broken", "Third"]);
    assert_eq!(items[1].values.get("Building"), None);
    assert_eq!(items[2].values["Building"], FieldValue::Lookup(3));
}

#[tokio::test]
async fn test_indexed_columns_match_case_insensitively() {
    let temp = create_test_dir();
    let (cms, root) = create_site().await;
    let session = open_session(
        &cms,
        r#"<pnp:lists>
  <pnp:ListInstance Title="Events">
    <pnp:IndexedColumns>
      <pnp:IndexedColumn Name="title" />
      <pnp:IndexedColumn Name="Missing" />
    </pnp:IndexedColumns>
  </pnp:ListInstance>
</pnp:lists>"#,
        temp.path(),
    )
    .await;

    let mut summary = RunSummary::default();
    reconcile_lists(&session, &mut summary).await.unwrap();

    assert_eq!(cms.indexed_fields(&root, "Events").await, vec!["Title"]);
    assert_eq!(summary.sections_failed, 0);
}

#[tokio::test]
async fn test_web_url_targets_another_web() {
    let temp = create_test_dir();
    let (cms, root) = create_site().await;
    let news = cms.add_web(&root, "news", "News").await;
    let body = format!(
        r#"<pnp:lists><pnp:ListInstance Title="Archive" WebUrl="{SITE}/news" /></pnp:lists>"#
    );
    let session = open_session(&cms, &body, temp.path()).await;

    let mut summary = RunSummary::default();
    reconcile_lists(&session, &mut summary).await.unwrap();

    assert!(cms.list_by_title(&news, "Archive").await.unwrap().is_some());
    assert!(cms.list_by_title(&root, "Archive").await.unwrap().is_none());
}

#[tokio::test]
async fn test_relative_web_url_targets_sub_site() {
    let temp = create_test_dir();
    let (cms, root) = create_site().await;
    let news = cms.add_web(&root, "news", "News").await;
    let session = open_session(
        &cms,
        r#"<pnp:lists>
  <pnp:ListInstance Title="Archive" WebUrl="news" />
  <pnp:ListInstance Title="Press" WebUrl="/news/" />
</pnp:lists>"#,
        temp.path(),
    )
    .await;

    let mut summary = RunSummary::default();
    reconcile_lists(&session, &mut summary).await.unwrap();

    assert_eq!(summary.sections_failed, 0);
    for title in ["Archive", "Press"] {
        assert!(cms.list_by_title(&news, title).await.unwrap().is_some());
        assert!(cms.list_by_title(&root, title).await.unwrap().is_none());
    }
}
