mod common;

use cms_provision::cms::{Cms, FieldInfo, FieldKind, FieldValue, ListTemplate, NavigationType};
use cms_provision::reconciliation::{
    apply_permissions, collect_navigation_nodes, create_content_types, create_role_definitions,
    create_sub_sites, import_term_sets, sync_device_channels, sync_navigation, ReconcileError,
    RunSummary, CHANNEL_ALIAS_FIELD, DEVICE_CHANNELS_LIST,
};
use cms_provision::manifest::CoercionError;
use common::{create_site, create_test_dir, open_session, SITE};

const SUB_SITE: &str = r#"<sites>
  <site web="" title="News" leafUrl="news" description="Company news" template="CMSPUBLISHING#0" language="1033" inheritpermissions="false" inheritnavigation="true" lists="newsLists" />
</sites>
<newsLists>
  <pnp:ListInstance Title="Press Releases" />
</newsLists>"#;

#[tokio::test]
async fn test_sub_site_is_created_with_permissions_and_lists() {
    let temp = create_test_dir();
    let (cms, root) = create_site().await;
    let session = open_session(&cms, SUB_SITE, temp.path()).await;

    let mut summary = RunSummary::default();
    create_role_definitions(&session).await.unwrap();
    create_sub_sites(&session, &mut summary).await.unwrap();

    assert_eq!(
        cms.role_definitions(&root).await,
        vec!["Content Contributor", "Content Manager", "Visitor"]
    );

    let news = cms
        .web_by_url(&format!("{SITE}/news"))
        .await
        .unwrap()
        .expect("Sub-site should exist");
    assert_eq!(news.title, "News");

    let (welcome, _) = cms
        .file(&news, "/sites/portal/news/Pages/default.aspx")
        .await
        .unwrap();
    assert_eq!(welcome.level, cms_provision::cms::FileLevel::Published);

    assert_eq!(
        cms.groups(&news).await,
        vec![
            ("Visitors".to_string(), "Visitor".to_string()),
            ("News Content Contributors".to_string(), "Content Contributor".to_string()),
            ("News Content Managers".to_string(), "Content Manager".to_string()),
        ]
    );
    assert!(cms.list_by_title(&news, "Press Releases").await.unwrap().is_some());
    assert!(cms.list_by_title(&root, "Press Releases").await.unwrap().is_none());
    assert_eq!(summary.sections_failed, 0);
}

#[tokio::test]
async fn test_existing_sub_site_is_skipped_but_lists_are_ensured() {
    let temp = create_test_dir();
    let (cms, root) = create_site().await;
    let news = cms.add_web(&root, "news", "News").await;
    let session = open_session(&cms, SUB_SITE, temp.path()).await;

    let mut summary = RunSummary::default();
    create_sub_sites(&session, &mut summary).await.unwrap();
    create_sub_sites(&session, &mut summary).await.unwrap();

    assert_eq!(cms.all_webs().await.len(), 2);
    assert!(cms.groups(&news).await.is_empty());
    let titles = cms.list_titles(&news).await;
    assert_eq!(titles.iter().filter(|t| *t == "Press Releases").count(), 1);
    assert_eq!(summary.sections_failed, 0);
}

#[tokio::test]
async fn test_sub_site_below_missing_parent_fails() {
    let temp = create_test_dir();
    let (cms, _root) = create_site().await;
    let session = open_session(
        &cms,
        r#"<sites><site web="missing" title="Deep" leafUrl="deep" /></sites>"#,
        temp.path(),
    )
    .await;

    let mut summary = RunSummary::default();
    create_sub_sites(&session, &mut summary).await.unwrap();

    assert_eq!(summary.sections_failed, 1);
    assert_eq!(cms.all_webs().await.len(), 1);
}

#[tokio::test]
async fn test_permissions_are_skipped_when_visitors_exist() {
    let (cms, root) = create_site().await;
    let temp = create_test_dir();
    let session = open_session(&cms, "", temp.path()).await;
    create_role_definitions(&session).await.unwrap();
    let team = cms.add_web(&root, "team", "Team").await;

    assert!(apply_permissions(cms.as_ref(), &team).await.unwrap());
    assert!(!apply_permissions(cms.as_ref(), &team).await.unwrap());
    assert_eq!(cms.groups(&team).await.len(), 3);
}

#[tokio::test]
async fn test_navigation_is_replicated_into_every_web() {
    let temp = create_test_dir();
    let (cms, root) = create_site().await;
    let a = cms.add_web(&root, "a", "A").await;
    let b = cms.add_web(&a, "b", "B").await;
    let session = open_session(
        &cms,
        r#"<pnp:NavigationNodes>
  <pnp:NavigationNode Title="Home" Url="https://cms.test/sites/portal" Type="TopNavigationBar" />
  <pnp:NavigationNode Title="Docs" Url="https://cms.test/sites/portal/docs" ParentTitle="Home" Type="TopNavigationBar" />
  <pnp:NavigationNode Title="Partner" Url="https://partner.test/" Type="QuickLaunch" External="true" />
</pnp:NavigationNodes>"#,
        temp.path(),
    )
    .await;

    let nodes = collect_navigation_nodes(&session).await.unwrap();
    let visited = sync_navigation(cms.as_ref(), &root, &nodes).await.unwrap();

    assert_eq!(visited, 3);
    for web in [&root, &a, &b] {
        assert_eq!(cms.navigation(web, NavigationType::TopNavigationBar).await.len(), 2);
        assert_eq!(cms.navigation(web, NavigationType::QuickLaunch).await.len(), 1);
    }
    let partner = cms
        .navigation_urls(&b)
        .await
        .into_iter()
        .find(|(title, _, _)| title == "Partner")
        .unwrap();
    assert_eq!(partner.1.as_deref(), Some("https://partner.test/"));
    assert!(partner.2);
}

#[tokio::test]
async fn test_navigation_with_malformed_url_fails() {
    let temp = create_test_dir();
    let (cms, _root) = create_site().await;
    let session = open_session(
        &cms,
        r#"<pnp:NavigationNodes><pnp:NavigationNode Title="Bad" Url="not a url" /></pnp:NavigationNodes>"#,
        temp.path(),
    )
    .await;

    let result = collect_navigation_nodes(&session).await;
    assert!(matches!(
        result,
        Err(ReconcileError::Coercion(CoercionError::InvalidUri { .. }))
    ));
}

#[tokio::test]
async fn test_device_channels_are_replaced_by_alias() {
    let temp = create_test_dir();
    let (cms, root) = create_site().await;
    cms.add_list(&root, DEVICE_CHANNELS_LIST, ListTemplate::GenericList).await;
    cms.add_field(
        &root,
        DEVICE_CHANNELS_LIST,
        FieldInfo {
            internal_name: CHANNEL_ALIAS_FIELD.to_string(),
            kind: FieldKind::Text,
        },
    )
    .await;
    for alias in ["A", "A", "A", "B"] {
        cms.seed_item(
            &root,
            DEVICE_CHANNELS_LIST,
            vec![(CHANNEL_ALIAS_FIELD, FieldValue::Text(alias.to_string()))],
        )
        .await;
    }
    let session = open_session(
        &cms,
        r#"<pnp:DeviceChannels>
  <pnp:DeviceChannel Title="Phone" ChannelAlias="A" />
  <pnp:DeviceChannel Title="Tablet" ChannelAlias="A" />
</pnp:DeviceChannels>"#,
        temp.path(),
    )
    .await;

    let mut summary = RunSummary::default();
    sync_device_channels(&session, &mut summary).await.unwrap();

    let items = cms.items(&root, DEVICE_CHANNELS_LIST).await;
    let aliased = |alias: &str| -> Vec<_> {
        items
            .iter()
            .filter(|i| i.text(CHANNEL_ALIAS_FIELD).as_deref() == Some(alias))
            .collect()
    };
    let a_items = aliased("A");
    assert_eq!(a_items.len(), 2);
    assert_eq!(a_items[0].text("Title").as_deref(), Some("Phone"));
    assert_eq!(a_items[1].text("Title").as_deref(), Some("Tablet"));
    let b_items = aliased("B");
    assert_eq!(b_items.len(), 1);
    assert_eq!(b_items[0].id, 4);
}

#[tokio::test]
async fn test_device_channels_without_list_are_skipped() {
    let temp = create_test_dir();
    let (cms, _root) = create_site().await;
    let session = open_session(
        &cms,
        r#"<pnp:DeviceChannels><pnp:DeviceChannel ChannelAlias="A" /></pnp:DeviceChannels>"#,
        temp.path(),
    )
    .await;

    let mut summary = RunSummary::default();
    sync_device_channels(&session, &mut summary).await.unwrap();
    assert_eq!(summary, RunSummary::default());
}

#[tokio::test]
async fn test_term_sets_are_imported_into_configured_group() {
    let temp = create_test_dir();
    let (cms, _root) = create_site().await;
    cms.add_term("Corporate", "Departments", "Finance").await;
    let session = open_session(
        &cms,
        r#"<termsets>
  <termset termSetFilePath="terms/departments.csv" />
  <termset termSetFilePath="terms/locations.csv" />
</termsets>"#,
        temp.path(),
    )
    .await;

    let mut summary = RunSummary::default();
    import_term_sets(&session, &mut summary).await.unwrap();

    assert_eq!(
        cms.imported_term_sets().await,
        vec![
            ("Corporate".to_string(), "terms/departments.csv".to_string()),
            ("Corporate".to_string(), "terms/locations.csv".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_content_types_are_created_once() {
    let temp = create_test_dir();
    let (cms, root) = create_site().await;
    let session = open_session(
        &cms,
        r#"<pnp:ContentTypes>
  <pnp:ContentType ID="0x0100BB" Name="Office" Group="Custom" Description="An office">
    <pnp:FieldRefs><pnp:FieldRef Name="Location" /></pnp:FieldRefs>
  </pnp:ContentType>
  <pnp:ContentType ID="0x01" Name="Item" />
</pnp:ContentTypes>"#,
        temp.path(),
    )
    .await;

    let mut summary = RunSummary::default();
    create_content_types(&session, &mut summary).await.unwrap();
    create_content_types(&session, &mut summary).await.unwrap();

    let office = cms.web_content_type(&root, "0x0100BB").await.unwrap();
    assert_eq!(office.name, "Office");
    assert_eq!(summary.sections_attempted, 4);
    assert_eq!(summary.sections_failed, 0);
}
